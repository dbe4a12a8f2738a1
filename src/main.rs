// Main module for fraud detection with an autoencoder. Orchestrates data loading, training, threshold selection and scoring.
use anyhow::{Context, Result};
use clap::Parser;
use linfa::traits::Fit;
use linfa::Dataset;

use config::Config;
use evaluation::evaluate_model;
use plot::plot_reconstruction_errors;
use preprocessing::prepare_training_data;
use scorer::detect_and_evaluate_fraud;

//imports other modules in the project
mod autoencoder;
mod config;
mod error;
mod evaluation;
mod plot;
mod preprocessing;
mod scorer;
mod table_reader;
mod trainer;

// Runs the whole pipeline for one configuration
// Inputs: validated configuration
// Outputs: Result indicating success or the first failing step
// Key steps:
// 1. Load and preprocess the training table, split train/test
// 2. Build and train the autoencoder
// 3. Pick a threshold from held-out errors and report it
// 4. Plot the held-out error distribution
// 5. Score the new dataset with the fitted preprocessing state
fn run(config: &Config) -> Result<()> {
    // Load training records
    let source = config.training_source();
    let table = source
        .load()
        .with_context(|| format!("failed to load training data from {}", source))?;
    if config.inspect {
        table.print_preview(5);
    }
    if let Some(path) = &config.export_training_csv {
        table
            .write_csv(path)
            .with_context(|| format!("failed to export training data to {}", path.display()))?;
    }

    // Preprocess and split
    let data = prepare_training_data(table, config.seed).context("failed to preprocess training data")?;
    let scaler = data.preprocessor.scaler();
    for (i, column) in data.preprocessor.feature_columns().iter().enumerate() {
        log::debug!("feature '{}': mean {:.4}, scale {:.4}", column, scaler.mean()[i], scaler.scale()[i]);
    }
    let params = config.autoencoder_params();
    println!("{}", params.build(data.train.ncols())?.summary());

    // Train the autoencoder
    let model = params
        .fit(&Dataset::from(data.train.clone()))
        .context("failed to train autoencoder")?;
    let history = model.history();
    log::info!(
        "trained for {} epochs, best val_loss {:.6} at epoch {}",
        history.epochs_run(),
        history.best_val_loss().unwrap_or(f64::NAN),
        history.best_epoch + 1
    );

    // Threshold and evaluation on the held-out split
    let evaluation = evaluate_model(&model, &data.test, config.threshold_percentile)?;
    println!(
        "\nSelected Threshold (at {}th percentile): {:.4}",
        config.threshold_percentile, evaluation.threshold
    );
    evaluation.report.print_performance();

    let plot_path = config.training_plot_path();
    plot_reconstruction_errors(&evaluation.errors, evaluation.threshold, &plot_path)
        .with_context(|| format!("failed to save plot to {}", plot_path.display()))?;

    // Score the new dataset
    let outcome = detect_and_evaluate_fraud(
        &config.score_csv,
        &model,
        &data.preprocessor,
        evaluation.threshold,
        &config.output_dir,
    )
    .with_context(|| format!("failed to score {}", config.score_csv.display()))?;
    log::info!(
        "flagged {} of {} rows in {}",
        outcome.report.anomaly_count,
        outcome.report.total_samples,
        config.score_csv.display()
    );
    log::debug!("anomalous rows: {:?}", outcome.anomalous_rows());
    log::info!(
        "wrote {}, {} and {}",
        outcome.errors_path.display(),
        outcome.plot_path.display(),
        outcome.report_path.display()
    );

    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    config.validate()?;
    log::debug!("configuration: {}", serde_json::to_string(&config)?);

    run(&config)
}

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use ndarray::Array1;
use ndarray_npy::write_npy;

use crate::autoencoder::Autoencoder;
use crate::error::Result;
use crate::evaluation::{score_matrix, AnomalyReport};
use crate::plot::plot_reconstruction_errors;
use crate::preprocessing::Preprocessor;
use crate::table_reader::read_csv_table;

pub const ERRORS_FILE: &str = "new_dataset_reconstruction_errors.npy";
pub const PLOT_FILE: &str = "new_dataset_reconstruction_error_distribution.png";
pub const REPORT_FILE: &str = "new_dataset_report.json";

// Errors, report and artifact locations for one scored dataset.
#[derive(Debug, Clone)]
pub struct ScoringOutcome {
    pub errors: Array1<f64>,
    pub report: AnomalyReport,
    pub errors_path: PathBuf,
    pub plot_path: PathBuf,
    pub report_path: PathBuf,
}

impl ScoringOutcome {
    // Row indices whose error exceeds the threshold.
    pub fn anomalous_rows(&self) -> Vec<usize> {
        self.errors
            .iter()
            .enumerate()
            .filter(|(_, error)| **error > self.report.threshold)
            .map(|(i, _)| i)
            .collect()
    }
}

// Scores a new CSV dataset with the trained model and fitted preprocessing.
// The category map and scaler come from training and are never refit, so a
// dataset with a different feature count fails with a dimension mismatch.
pub fn detect_and_evaluate_fraud(
    csv_path: &Path,
    model: &Autoencoder,
    preprocessor: &Preprocessor,
    threshold: f64,
    output_dir: &Path,
) -> Result<ScoringOutcome> {
    println!("\nDetecting Fraud on New Dataset");
    println!("{}", "=".repeat(40));

    let table = read_csv_table(csv_path)?;
    let data = preprocessor.transform(table)?;
    let errors = score_matrix(model, &data)?;

    let report = AnomalyReport::new(&errors, threshold)?;
    report.print_detection();

    let errors_path = output_dir.join(ERRORS_FILE);
    write_npy(&errors_path, &errors)?;
    log::info!("saved {} reconstruction errors to {}", errors.len(), errors_path.display());

    let report_path = output_dir.join(REPORT_FILE);
    let writer = BufWriter::new(File::create(&report_path)?);
    serde_json::to_writer_pretty(writer, &report)?;

    let plot_path = output_dir.join(PLOT_FILE);
    plot_reconstruction_errors(&errors, threshold, &plot_path)?;

    Ok(ScoringOutcome {
        errors,
        report,
        errors_path,
        plot_path,
        report_path,
    })
}

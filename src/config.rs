use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

use crate::autoencoder::AutoencoderParams;
use crate::error::{DetectorError, Result};
use crate::table_reader::DataSource;

pub const DEFAULT_DB_PATH: &str = "db.sqlite3";
pub const DEFAULT_TABLE: &str = "account_stripemodel";
pub const DEFAULT_SCORE_CSV: &str = "account_stripemodel_fraud_data.csv";
pub const TRAINING_PLOT_FILE: &str = "reconstruction_error_distribution.png";

// Command-line configuration. Every flag has a default.
#[derive(Parser, Debug, Clone, Serialize)]
#[command(
    author,
    version,
    about = "Train an autoencoder on payment-account records and flag anomalies by reconstruction error"
)]
pub struct Config {
    #[arg(long, default_value = DEFAULT_DB_PATH, help = "Path to the SQLite database holding the training table")]
    pub db_path: PathBuf,

    #[arg(long, default_value = DEFAULT_TABLE, help = "Table to read training records from")]
    pub table: String,

    #[arg(long, help = "Read training records from this CSV instead of the database")]
    pub train_csv: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_SCORE_CSV, help = "CSV dataset to score with the trained model")]
    pub score_csv: PathBuf,

    #[arg(long, num_args = 1.., default_values_t = vec![16, 8, 4], help = "Encoder layer widths, outermost first")]
    pub encoding_dims: Vec<usize>,

    #[arg(long, default_value_t = 100, help = "Number of training epochs")]
    pub epochs: usize,

    #[arg(long, default_value_t = 32, help = "Batch size for training")]
    pub batch_size: usize,

    #[arg(long, default_value_t = 0.001, help = "L2 regularization factor for hidden layers")]
    pub l2_reg: f64,

    #[arg(long, default_value_t = 0.2, help = "Dropout rate after each hidden layer (0 disables dropout)")]
    pub dropout_rate: f64,

    #[arg(long, default_value_t = 95.0, help = "Percentile of held-out errors used as the anomaly threshold")]
    pub threshold_percentile: f64,

    #[arg(long, default_value_t = 0.001, help = "Adam learning rate")]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 10, help = "Epochs without validation improvement before training stops")]
    pub patience: usize,

    #[arg(long, default_value_t = 0.2, help = "Share of training rows held out to monitor validation loss")]
    pub validation_split: f64,

    #[arg(long, default_value_t = 42, help = "Seed for the train/test split, weight initialization and shuffling")]
    pub seed: u64,

    #[arg(long, default_value = ".", help = "Directory receiving plots, the error array and the JSON report")]
    pub output_dir: PathBuf,

    #[arg(long, help = "Print column names and the first rows of the training table")]
    pub inspect: bool,

    #[arg(long, help = "Write the raw training table to this CSV file")]
    pub export_training_csv: Option<PathBuf>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.threshold_percentile) {
            return Err(DetectorError::InvalidParameter(format!(
                "threshold percentile must be in [0, 100], got {}",
                self.threshold_percentile
            )));
        }
        self.autoencoder_params().check()
    }

    pub fn training_source(&self) -> DataSource {
        match &self.train_csv {
            Some(path) => DataSource::Csv(path.clone()),
            None => DataSource::Sqlite {
                path: self.db_path.clone(),
                table: self.table.clone(),
            },
        }
    }

    pub fn autoencoder_params(&self) -> AutoencoderParams {
        AutoencoderParams::new(self.encoding_dims.clone())
            .l2_reg(self.l2_reg)
            .dropout_rate(self.dropout_rate)
            .epochs(self.epochs)
            .batch_size(self.batch_size)
            .learning_rate(self.learning_rate)
            .patience(self.patience)
            .validation_split(self.validation_split)
            .seed(self.seed)
    }

    pub fn training_plot_path(&self) -> PathBuf {
        self.output_dir.join(TRAINING_PLOT_FILE)
    }
}

use ndarray::{Array1, Array2, Axis};
use serde::Serialize;

use crate::autoencoder::Autoencoder;
use crate::error::{DetectorError, Result};

pub const TOP_ANOMALIES: usize = 5;

// Per-row mean squared difference between inputs and reconstructions.
pub fn reconstruction_errors(original: &Array2<f64>, reconstruction: &Array2<f64>) -> Result<Array1<f64>> {
    if original.dim() != reconstruction.dim() {
        return Err(DetectorError::DimensionMismatch {
            expected: original.ncols(),
            found: reconstruction.ncols(),
        });
    }
    let width = original.ncols().max(1) as f64;
    Ok((reconstruction - original).mapv(|d| d * d).sum_axis(Axis(1)) / width)
}

// Runs `data` through `model` and returns per-row reconstruction errors.
pub fn score_matrix(model: &Autoencoder, data: &Array2<f64>) -> Result<Array1<f64>> {
    let reconstruction = model.reconstruct(data)?;
    reconstruction_errors(data, &reconstruction)
}

// Percentile with linear interpolation between closest ranks.
pub fn percentile(values: &Array1<f64>, p: f64) -> Result<f64> {
    if !(0.0..=100.0).contains(&p) {
        return Err(DetectorError::InvalidParameter(format!("percentile must be in [0, 100], got {}", p)));
    }
    if values.is_empty() {
        return Err(DetectorError::EmptyDataset("no errors to take a percentile of".into()));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DetectorError::InvalidParameter("errors must be finite to take a percentile".into()));
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let (lo, hi) = (sorted[lower], sorted[upper]);
    if lower == upper {
        return Ok(lo);
    }
    // Clamped so rounding can never step past the neighbouring rank
    Ok((lo + (hi - lo) * (rank - lower as f64)).clamp(lo, hi))
}

// Indices of the `k` largest errors, largest first. Ties keep index order.
pub fn top_anomalies(errors: &Array1<f64>, k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..errors.len()).collect();
    indices.sort_by(|&a, &b| errors[b].total_cmp(&errors[a]));
    indices.truncate(k);
    indices
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorStatistics {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
}

impl ErrorStatistics {
    pub fn from_errors(errors: &Array1<f64>) -> Result<Self> {
        let mean = errors
            .mean()
            .ok_or_else(|| DetectorError::EmptyDataset("no errors to summarize".into()))?;
        Ok(Self {
            mean,
            median: percentile(errors, 50.0)?,
            min: errors.iter().copied().fold(f64::INFINITY, f64::min),
            max: errors.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            std: errors.std(0.0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopAnomaly {
    pub index: usize,
    pub error: f64,
}

// Statistics of one error distribution classified against a threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub statistics: ErrorStatistics,
    pub threshold: f64,
    pub anomaly_count: usize,
    pub total_samples: usize,
    pub proportion: f64,
    pub top_anomalies: Vec<TopAnomaly>,
}

impl AnomalyReport {
    pub fn new(errors: &Array1<f64>, threshold: f64) -> Result<Self> {
        let statistics = ErrorStatistics::from_errors(errors)?;
        let anomaly_count = errors.iter().filter(|&&e| e > threshold).count();
        let total_samples = errors.len();
        let top_anomalies = top_anomalies(errors, TOP_ANOMALIES)
            .into_iter()
            .map(|index| TopAnomaly {
                index,
                error: errors[index],
            })
            .collect();

        Ok(Self {
            statistics,
            threshold,
            anomaly_count,
            total_samples,
            proportion: anomaly_count as f64 / total_samples as f64,
            top_anomalies,
        })
    }

    // Full block: error statistics, threshold counts and top anomalies.
    pub fn print_performance(&self) {
        let stats = &self.statistics;
        println!("\nModel Performance Metrics");
        println!("{}", "=".repeat(40));
        println!("Reconstruction Error Statistics:");
        println!("- Mean Error: {:.4}", stats.mean);
        println!("- Median Error: {:.4}", stats.median);
        println!("- Min Error: {:.4}", stats.min);
        println!("- Max Error: {:.4}", stats.max);
        println!("- Std Deviation: {:.4}", stats.std);
        println!("\nAnomaly Detection at Threshold");
        println!("{}", "-".repeat(40));
        println!("- Threshold: {:.4}", self.threshold);
        println!("- Number of Anomalies Detected: {}", self.anomaly_count);
        println!("- Proportion of Anomalies: {:.2}%", self.proportion * 100.0);
        self.print_top_anomalies("Top 5 Anomalies (Highest Reconstruction Errors):");
    }

    // Short block used for scored datasets.
    pub fn print_detection(&self) {
        println!("Threshold: {:.4}", self.threshold);
        println!("Number of Anomalies Detected: {}", self.anomaly_count);
        println!("Proportion of Anomalies: {:.2}%", self.proportion * 100.0);
        println!("Mean Error: {:.4}, Max Error: {:.4}", self.statistics.mean, self.statistics.max);
        self.print_top_anomalies("Top 5 Anomalies in New Dataset (Highest Reconstruction Errors):");
    }

    fn print_top_anomalies(&self, heading: &str) {
        println!("\n{}", heading);
        for anomaly in &self.top_anomalies {
            println!("  Sample Index: {}, Reconstruction Error: {:.4}", anomaly.index, anomaly.error);
        }
    }
}

// Errors on the held-out split and the threshold derived from them.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub errors: Array1<f64>,
    pub threshold: f64,
    pub report: AnomalyReport,
}

pub fn evaluate_model(model: &Autoencoder, test: &Array2<f64>, threshold_percentile: f64) -> Result<Evaluation> {
    let errors = score_matrix(model, test)?;
    let threshold = percentile(&errors, threshold_percentile)?;
    let report = AnomalyReport::new(&errors, threshold)?;
    Ok(Evaluation {
        errors,
        threshold,
        report,
    })
}

// Turns raw account tables into standardized feature matrices.
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{DetectorError, Result};
use crate::table_reader::{Cell, Table};

// Identifier and free-text columns removed before modeling.
pub const IDENTIFIER_COLUMNS: [&str; 7] = [
    "id",
    "card_id",
    "customer_id",
    "email",
    "address_city",
    "address_country",
    "name_on_card",
];
pub const CATEGORICAL_COLUMN: &str = "address_state";
pub const TEST_SIZE: f64 = 0.2;

// Maps category labels to integer codes in sorted label order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryEncoder {
    classes: Vec<String>,
}

impl CategoryEncoder {
    pub fn fit<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut classes: Vec<String> = labels.into_iter().map(Into::into).collect();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn encode(&self, label: &str) -> Option<usize> {
        self.classes.binary_search_by(|c| c.as_str().cmp(label)).ok()
    }

    // Code given to labels that were not seen while fitting.
    pub fn unknown_code(&self) -> usize {
        self.classes.len()
    }
}

// Per-column standardization to zero mean and unit variance.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(data: &Array2<f64>) -> Result<Self> {
        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| DetectorError::EmptyDataset("cannot fit scaler on zero rows".into()))?;
        // Constant columns keep a unit scale
        let scale = data
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s < 10.0 * f64::EPSILON { 1.0 } else { s });
        Ok(Self { mean, scale })
    }

    pub fn fit_transform(data: &Array2<f64>) -> Result<(Self, Array2<f64>)> {
        let scaler = Self::fit(data)?;
        let scaled = scaler.transform(data)?;
        Ok((scaler, scaled))
    }

    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        if data.ncols() != self.n_features() {
            return Err(DetectorError::DimensionMismatch {
                expected: self.n_features(),
                found: data.ncols(),
            });
        }
        Ok((data - &self.mean) / &self.scale)
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }
}

// Preprocessing state fit on the training table and reused for scoring.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    columns: Vec<String>,
    encoder: Option<CategoryEncoder>,
    scaler: StandardScaler,
}

impl Preprocessor {
    // Cleans the table, fits the category encoder and scaler, and returns
    // the scaled feature matrix alongside the fitted state.
    pub fn fit(table: Table) -> Result<(Self, Array2<f64>)> {
        let table = clean_table(table, "training")?;
        let encoder = table.column_index(CATEGORICAL_COLUMN).map(|idx| {
            CategoryEncoder::fit(table.rows.iter().map(|row| row[idx].label()))
        });
        if let Some(encoder) = &encoder {
            log::info!("encoded '{}' into {} categories", CATEGORICAL_COLUMN, encoder.classes().len());
        }

        let features = feature_matrix(&table, encoder.as_ref())?;
        let (scaler, scaled) = StandardScaler::fit_transform(&features)?;
        let preprocessor = Self {
            columns: table.columns,
            encoder,
            scaler,
        };
        Ok((preprocessor, scaled))
    }

    // Applies the fitted encoder and scaler to a new table. Nothing is refit.
    pub fn transform(&self, table: Table) -> Result<Array2<f64>> {
        let table = clean_table(table, "scoring")?;
        if table.columns != self.columns {
            log::warn!(
                "feature columns differ from training: expected [{}], found [{}]",
                self.columns.join(", "),
                table.columns.join(", ")
            );
        }
        let features = feature_matrix(&table, self.encoder.as_ref())?;
        self.scaler.transform(&features)
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.columns
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }
}

// Scaled training data split into train and test matrices.
#[derive(Debug, Clone)]
pub struct TrainingData {
    pub train: Array2<f64>,
    pub test: Array2<f64>,
    pub preprocessor: Preprocessor,
}

pub fn prepare_training_data(table: Table, seed: u64) -> Result<TrainingData> {
    let (preprocessor, scaled) = Preprocessor::fit(table)?;
    let (train, test) = train_test_split(&scaled, TEST_SIZE, seed);
    if train.nrows() == 0 || test.nrows() == 0 {
        return Err(DetectorError::EmptyDataset(format!(
            "{} rows cannot be split into train and test sets",
            scaled.nrows()
        )));
    }
    log::info!("split {} rows into {} train / {} test", scaled.nrows(), train.nrows(), test.nrows());
    Ok(TrainingData {
        train,
        test,
        preprocessor,
    })
}

// Shuffles rows with a seeded RNG and takes `ceil(test_size * n)` of them
// as the test set. Returns `(train, test)`.
pub fn train_test_split(data: &Array2<f64>, test_size: f64, seed: u64) -> (Array2<f64>, Array2<f64>) {
    let n = data.nrows();
    let n_test = ((test_size * n as f64).ceil() as usize).min(n);

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let (test_idx, train_idx) = indices.split_at(n_test);
    (data.select(Axis(0), train_idx), data.select(Axis(0), test_idx))
}

fn clean_table(mut table: Table, stage: &str) -> Result<Table> {
    let removed = table.drop_incomplete_rows();
    if removed > 0 {
        log::info!("{}: dropped {} rows with missing or infinite values", stage, removed);
    }
    let dropped = table.drop_columns(&IDENTIFIER_COLUMNS);
    log::debug!("{}: dropped identifier columns [{}]", stage, dropped.join(", "));

    if table.is_empty() {
        return Err(DetectorError::EmptyDataset(format!("{} table has no complete rows", stage)));
    }
    if table.columns.is_empty() {
        return Err(DetectorError::EmptyDataset(format!("{} table has no feature columns", stage)));
    }
    Ok(table)
}

fn feature_matrix(table: &Table, encoder: Option<&CategoryEncoder>) -> Result<Array2<f64>> {
    let categorical = table.column_index(CATEGORICAL_COLUMN);
    let mut unseen = 0usize;
    let mut features = Array2::zeros((table.len(), table.columns.len()));

    for (i, row) in table.rows.iter().enumerate() {
        for (j, cell) in row.iter().enumerate() {
            features[[i, j]] = match (cell, encoder) {
                (cell, Some(encoder)) if Some(j) == categorical => {
                    let label = cell.label();
                    encoder.encode(&label).unwrap_or_else(|| {
                        unseen += 1;
                        encoder.unknown_code()
                    }) as f64
                }
                (Cell::Number(value), _) => *value,
                (other, _) => {
                    return Err(DetectorError::NonNumericColumn {
                        column: table.columns[j].clone(),
                        value: other.label(),
                    })
                }
            };
        }
    }

    if unseen > 0 {
        log::warn!(
            "{} rows carry '{}' values unseen during training; they share code {}",
            unseen,
            CATEGORICAL_COLUMN,
            encoder.map(CategoryEncoder::unknown_code).unwrap_or_default()
        );
    }
    Ok(features)
}

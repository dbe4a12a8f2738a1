use std::fmt::Write as _;

use linfa::traits::{Fit, PredictInplace};
use linfa::DatasetBase;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Uniform};
use serde::Serialize;

use crate::error::{DetectorError, Result};
use crate::trainer::{self, TrainingHistory};

// Activation functions used by the dense layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Activation {
    // max(0, x)
    ReLU,
    // 1 / (1 + exp(-x)), bounded to (0, 1)
    Sigmoid,
}

impl Activation {
    pub fn forward(&self, x: f64) -> f64 {
        match self {
            Activation::ReLU => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }

    // Derivative with respect to the pre-activation value.
    pub fn derivative(&self, z: f64) -> f64 {
        match self {
            Activation::ReLU => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => {
                let s = self.forward(z);
                s * (1.0 - s)
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Activation::ReLU => "relu",
            Activation::Sigmoid => "sigmoid",
        }
    }
}

// Fully-connected layer. `l2` is the kernel regularization strength.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseLayer {
    pub weights: Array2<f64>,
    pub biases: Array1<f64>,
    pub activation: Activation,
    pub l2: f64,
}

impl DenseLayer {
    // Glorot-uniform weights, zero biases.
    pub fn new<R: Rng>(input_size: usize, output_size: usize, activation: Activation, l2: f64, rng: &mut R) -> Self {
        let limit = (6.0 / (input_size + output_size) as f64).sqrt();
        let uniform = Uniform::new_inclusive(-limit, limit);
        let weights = Array2::from_shape_fn((input_size, output_size), |_| uniform.sample(&mut *rng));

        Self {
            weights,
            biases: Array1::zeros(output_size),
            activation,
            l2,
        }
    }

    pub fn output_size(&self) -> usize {
        self.weights.ncols()
    }

    pub fn parameter_count(&self) -> usize {
        self.weights.len() + self.biases.len()
    }

    // z = x W + b
    pub fn pre_activation(&self, input: &Array2<f64>) -> Array2<f64> {
        input.dot(&self.weights) + &self.biases
    }

    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        let activation = self.activation;
        self.pre_activation(input).mapv_into(|z| activation.forward(z))
    }

    // L2 penalty this layer adds to the loss.
    pub fn penalty(&self) -> f64 {
        if self.l2 > 0.0 {
            self.l2 * self.weights.mapv(|w| w * w).sum()
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    Dense(DenseLayer),
    // Drops units with the given rate during training only.
    Dropout(f64),
}

// Hyperparameters for building and training an Autoencoder, set with builder methods
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoencoderParams {
    pub encoding_dims: Vec<usize>,
    pub l2_reg: f64,
    pub dropout_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub patience: usize,
    pub validation_split: f64,
    pub seed: u64,
}

impl AutoencoderParams {
    pub fn new(encoding_dims: Vec<usize>) -> Self {
        Self {
            encoding_dims,
            l2_reg: 0.001,
            dropout_rate: 0.0,
            epochs: 100,
            batch_size: 32,
            learning_rate: 0.001,
            patience: 10,
            validation_split: 0.2,
            seed: 42,
        }
    }

    pub fn l2_reg(mut self, l2_reg: f64) -> Self {
        self.l2_reg = l2_reg;
        self
    }

    pub fn dropout_rate(mut self, dropout_rate: f64) -> Self {
        self.dropout_rate = dropout_rate;
        self
    }

    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    pub fn validation_split(mut self, validation_split: f64) -> Self {
        self.validation_split = validation_split;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn check(&self) -> Result<()> {
        if self.encoding_dims.is_empty() {
            return Err(DetectorError::InvalidParameter("at least one encoding dimension is required".into()));
        }
        if self.encoding_dims.contains(&0) {
            return Err(DetectorError::InvalidParameter("encoding dimensions must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(DetectorError::InvalidParameter(format!(
                "dropout rate must be in [0, 1), got {}",
                self.dropout_rate
            )));
        }
        if !(self.l2_reg >= 0.0) {
            return Err(DetectorError::InvalidParameter(format!(
                "l2 regularization must be non-negative, got {}",
                self.l2_reg
            )));
        }
        if self.batch_size == 0 {
            return Err(DetectorError::InvalidParameter("batch size must be positive".into()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(DetectorError::InvalidParameter(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(DetectorError::InvalidParameter(format!(
                "validation split must be in [0, 1), got {}",
                self.validation_split
            )));
        }
        Ok(())
    }

    // Builds an untrained model for `input_dim` features.
    pub fn build(&self, input_dim: usize) -> Result<Autoencoder> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        self.build_with_rng(input_dim, &mut rng)
    }

    fn build_with_rng<R: Rng>(&self, input_dim: usize, rng: &mut R) -> Result<Autoencoder> {
        self.check()?;
        if input_dim == 0 {
            return Err(DetectorError::InvalidParameter("input dimension must be positive".into()));
        }

        let mut layers = Vec::new();
        let mut prev = input_dim;

        // Encoder narrows through every width, decoder mirrors all but the bottleneck
        let bottleneck = self.encoding_dims.len() - 1;
        let decoder_dims = self.encoding_dims[..bottleneck].iter().rev();
        for &width in self.encoding_dims.iter().chain(decoder_dims) {
            layers.push(Layer::Dense(DenseLayer::new(prev, width, Activation::ReLU, self.l2_reg, rng)));
            if self.dropout_rate > 0.0 {
                layers.push(Layer::Dropout(self.dropout_rate));
            }
            prev = width;
        }
        layers.push(Layer::Dense(DenseLayer::new(prev, input_dim, Activation::Sigmoid, 0.0, rng)));

        Ok(Autoencoder {
            layers,
            input_dim,
            history: TrainingHistory::default(),
        })
    }
}

impl<T> Fit<Array2<f64>, T, DetectorError> for AutoencoderParams {
    type Object = Autoencoder;

    fn fit(&self, dataset: &DatasetBase<Array2<f64>, T>) -> Result<Autoencoder> {
        let records = &dataset.records;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut model = self.build_with_rng(records.ncols(), &mut rng)?;
        let history = trainer::train(&mut model, records, self, &mut rng)?;
        model.history = history;
        Ok(model)
    }
}

// Dense encoder/decoder stack trained to reproduce its input.
#[derive(Debug, Clone)]
pub struct Autoencoder {
    pub(crate) layers: Vec<Layer>,
    input_dim: usize,
    pub(crate) history: TrainingHistory,
}

impl Autoencoder {
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.dense_layers().last().map(DenseLayer::output_size).unwrap_or(self.input_dim)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn dense_layers(&self) -> impl Iterator<Item = &DenseLayer> {
        self.layers.iter().filter_map(|layer| match layer {
            Layer::Dense(dense) => Some(dense),
            Layer::Dropout(_) => None,
        })
    }

    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    pub fn parameter_count(&self) -> usize {
        self.dense_layers().map(DenseLayer::parameter_count).sum()
    }

    // Sum of the L2 penalties of all dense layers.
    pub fn penalty(&self) -> f64 {
        self.dense_layers().map(DenseLayer::penalty).sum()
    }

    // Inference-mode forward pass; dropout is the identity.
    pub fn reconstruct(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        if data.ncols() != self.input_dim {
            return Err(DetectorError::DimensionMismatch {
                expected: self.input_dim,
                found: data.ncols(),
            });
        }
        Ok(self.forward(data))
    }

    fn forward(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut x = data.to_owned();
        for dense in self.dense_layers() {
            x = dense.forward(&x);
        }
        x
    }

    // Keras-style table of layers, output widths and parameter counts.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let rule = "=".repeat(56);
        let _ = writeln!(out, "Model Summary");
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "{:<24}{:<18}{:>14}", "Layer (type)", "Output Shape", "Param #");
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "{:<24}{:<18}{:>14}", "input", format!("(None, {})", self.input_dim), 0);

        let mut width = self.input_dim;
        for (i, layer) in self.layers().iter().enumerate() {
            let (name, params) = match layer {
                Layer::Dense(dense) => {
                    width = dense.output_size();
                    (format!("dense_{} ({})", i, dense.activation.name()), dense.parameter_count())
                }
                Layer::Dropout(rate) => (format!("dropout_{} ({})", i, rate), 0),
            };
            let _ = writeln!(out, "{:<24}{:<18}{:>14}", name, format!("(None, {})", width), params);
        }
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Total params: {}", self.parameter_count());
        out
    }
}

impl PredictInplace<Array2<f64>, Array2<f64>> for Autoencoder {
    fn predict_inplace(&self, x: &Array2<f64>, y: &mut Array2<f64>) {
        assert_eq!(
            x.ncols(),
            self.input_dim,
            "number of feature columns must match the model input width"
        );
        *y = self.forward(x);
    }

    fn default_target(&self, x: &Array2<f64>) -> Array2<f64> {
        Array2::zeros((x.nrows(), self.output_dim()))
    }
}

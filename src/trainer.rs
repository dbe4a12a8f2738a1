use ndarray::{s, Array, Array1, Array2, Axis, Dimension, Zip};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::autoencoder::{Autoencoder, AutoencoderParams, Layer};
use crate::error::{DetectorError, Result};

// Per-epoch losses recorded while fitting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
    pub val_loss: Vec<f64>,
    // Zero-based epoch whose weights were kept.
    pub best_epoch: usize,
    pub stopped_early: bool,
}

impl TrainingHistory {
    pub fn epochs_run(&self) -> usize {
        self.loss.len()
    }

    pub fn best_val_loss(&self) -> Option<f64> {
        self.val_loss.get(self.best_epoch).copied()
    }
}

// What the forward pass needs to keep for backpropagation.
enum Trace {
    Dense { input: Array2<f64>, z: Array2<f64> },
    Dropout { mask: Array2<f64> },
}

struct Gradients {
    weights: Array2<f64>,
    biases: Array1<f64>,
}

struct Moments {
    m_weights: Array2<f64>,
    v_weights: Array2<f64>,
    m_biases: Array1<f64>,
    v_biases: Array1<f64>,
}

// Adam with Keras defaults apart from the learning rate.
struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    step: i32,
    moments: Vec<Option<Moments>>,
}

impl Adam {
    fn new(layers: &[Layer], learning_rate: f64) -> Self {
        let moments = layers
            .iter()
            .map(|layer| match layer {
                Layer::Dense(dense) => Some(Moments {
                    m_weights: Array2::zeros(dense.weights.raw_dim()),
                    v_weights: Array2::zeros(dense.weights.raw_dim()),
                    m_biases: Array1::zeros(dense.biases.raw_dim()),
                    v_biases: Array1::zeros(dense.biases.raw_dim()),
                }),
                Layer::Dropout(_) => None,
            })
            .collect();

        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            moments,
        }
    }

    fn apply(&mut self, layers: &mut [Layer], grads: &[Option<Gradients>]) {
        self.step += 1;
        let lr_t = self.learning_rate * (1.0 - self.beta2.powi(self.step)).sqrt()
            / (1.0 - self.beta1.powi(self.step));
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);

        for ((layer, grad), moments) in layers.iter_mut().zip(grads).zip(self.moments.iter_mut()) {
            if let (Layer::Dense(dense), Some(grad), Some(m)) = (layer, grad, moments) {
                adam_update(&mut dense.weights, &grad.weights, &mut m.m_weights, &mut m.v_weights, lr_t, beta1, beta2, epsilon);
                adam_update(&mut dense.biases, &grad.biases, &mut m.m_biases, &mut m.v_biases, lr_t, beta1, beta2, epsilon);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn adam_update<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    m: &mut Array<f64, D>,
    v: &mut Array<f64, D>,
    lr_t: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
) {
    Zip::from(param)
        .and(m)
        .and(v)
        .and(grad)
        .for_each(|p, m, v, &g| {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            *p -= lr_t * *m / (v.sqrt() + epsilon);
        });
}

fn forward_train<R: Rng>(layers: &[Layer], batch: &Array2<f64>, rng: &mut R) -> (Array2<f64>, Vec<Trace>) {
    let mut x = batch.to_owned();
    let mut traces = Vec::with_capacity(layers.len());

    for layer in layers {
        match layer {
            Layer::Dense(dense) => {
                let z = dense.pre_activation(&x);
                let activation = dense.activation;
                let a = z.mapv(|v| activation.forward(v));
                traces.push(Trace::Dense { input: x, z });
                x = a;
            }
            Layer::Dropout(rate) => {
                // Inverted dropout keeps the expected activation unchanged
                let keep = 1.0 - rate;
                let mask = Array2::from_shape_fn(x.raw_dim(), |_| {
                    if rng.gen::<f64>() < keep {
                        1.0 / keep
                    } else {
                        0.0
                    }
                });
                x = x * &mask;
                traces.push(Trace::Dropout { mask });
            }
        }
    }
    (x, traces)
}

fn backward(layers: &[Layer], traces: &[Trace], mut grad: Array2<f64>) -> Vec<Option<Gradients>> {
    let mut grads: Vec<Option<Gradients>> = layers.iter().map(|_| None).collect();

    for (idx, (layer, trace)) in layers.iter().zip(traces).enumerate().rev() {
        match (layer, trace) {
            (Layer::Dense(dense), Trace::Dense { input, z }) => {
                let activation = dense.activation;
                let delta = grad * &z.mapv(|v| activation.derivative(v));
                let mut weights = input.t().dot(&delta);
                if dense.l2 > 0.0 {
                    weights.scaled_add(2.0 * dense.l2, &dense.weights);
                }
                let biases = delta.sum_axis(Axis(0));
                grad = delta.dot(&dense.weights.t());
                grads[idx] = Some(Gradients { weights, biases });
            }
            (Layer::Dropout(_), Trace::Dropout { mask }) => {
                grad = grad * mask;
            }
            _ => unreachable!("forward trace out of step with layers"),
        }
    }
    grads
}

fn mse(output: &Array2<f64>, target: &Array2<f64>) -> f64 {
    (output - target).mapv(|d| d * d).mean().unwrap_or(0.0)
}

// Reconstruction loss plus regularization, in inference mode.
pub fn evaluate_loss(model: &Autoencoder, data: &Array2<f64>) -> Result<f64> {
    let output = model.reconstruct(data)?;
    Ok(mse(&output, data) + model.penalty())
}

// Fits `model` to reproduce `data`.
// The trailing `validation_split` share of rows is held out and never
// shuffled into training batches. Training stops once validation loss has
// not improved for `patience` epochs, and the best weights are restored.
pub fn train<R: Rng>(
    model: &mut Autoencoder,
    data: &Array2<f64>,
    params: &AutoencoderParams,
    rng: &mut R,
) -> Result<TrainingHistory> {
    if data.ncols() != model.input_dim() {
        return Err(DetectorError::DimensionMismatch {
            expected: model.input_dim(),
            found: data.ncols(),
        });
    }
    let n = data.nrows();
    let split_at = (n as f64 * (1.0 - params.validation_split)).floor() as usize;
    if split_at == 0 {
        return Err(DetectorError::EmptyDataset(format!(
            "{} rows leave nothing to train on after the validation split",
            n
        )));
    }
    let train = data.slice(s![..split_at, ..]).to_owned();
    let validation = data.slice(s![split_at.., ..]).to_owned();
    if validation.nrows() == 0 {
        log::warn!("validation split is empty; early stopping monitors training loss");
    }
    log::info!(
        "training on {} rows, validating on {} rows, batch size {}",
        train.nrows(),
        validation.nrows(),
        params.batch_size
    );

    let mut optimizer = Adam::new(&model.layers, params.learning_rate);
    let mut indices: Vec<usize> = (0..split_at).collect();
    let mut history = TrainingHistory::default();
    let mut best_loss = f64::INFINITY;
    let mut best_layers = None;
    let mut wait = 0;

    for epoch in 0..params.epochs {
        indices.shuffle(rng);
        let mut weighted_loss = 0.0;

        for chunk in indices.chunks(params.batch_size) {
            let batch = train.select(Axis(0), chunk);
            let (output, traces) = forward_train(&model.layers, &batch, rng);
            weighted_loss += (mse(&output, &batch) + model.penalty()) * chunk.len() as f64;

            let grad = (&output - &batch) * (2.0 / output.len() as f64);
            let grads = backward(&model.layers, &traces, grad);
            optimizer.apply(&mut model.layers, &grads);
        }

        let loss = weighted_loss / split_at as f64;
        let val_loss = if validation.nrows() > 0 {
            evaluate_loss(model, &validation)?
        } else {
            loss
        };
        history.loss.push(loss);
        history.val_loss.push(val_loss);
        log::info!(
            "Epoch {}/{}: loss = {:.6}, val_loss = {:.6}",
            epoch + 1,
            params.epochs,
            loss,
            val_loss
        );

        if val_loss < best_loss {
            best_loss = val_loss;
            history.best_epoch = epoch;
            best_layers = Some(model.layers.clone());
            wait = 0;
        } else {
            wait += 1;
            if wait >= params.patience {
                history.stopped_early = true;
                log::info!("early stopping after epoch {}", epoch + 1);
                break;
            }
        }
    }

    if let Some(layers) = best_layers {
        log::info!("restoring weights from epoch {}", history.best_epoch + 1);
        model.layers = layers;
    }
    Ok(history)
}

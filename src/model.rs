use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use ndarray::{s, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::callbacks::{Callback, CallbackAction};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::history::{History, Logs};
use crate::layers::{Layer, LayerState, Param};
use crate::metrics::{accuracy, argmax_rows};
use crate::Loss;
use crate::Optimizer;

/// Rows pushed through the network at once when predicting
const PREDICT_BATCH: usize = 4096;

/// Sequential network: each layer feeds the next
#[derive(Debug, Clone)]
pub struct Model {
    pub layers: Vec<Box<dyn Layer>>,
    input_dim: usize,
    loss: Option<Loss>,
    optimizer: Option<Optimizer>,
    device: Device,
}

/// Settings for one call to [`Model::fit`]
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    /// Per-class loss multiplier, classes not listed weigh 1
    pub class_weight: Option<BTreeMap<usize, f32>>,
    pub shuffle: bool,
    /// Print one summary line per epoch
    pub verbose: bool,
    /// Seeds the per-epoch shuffle
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            epochs: 1,
            batch_size: 32,
            class_weight: None,
            shuffle: true,
            verbose: false,
            seed: 0,
        }
    }
}

/// Loss and accuracy over a labelled set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
}

#[derive(Serialize, Deserialize)]
struct ModelFile {
    input_dim: usize,
    loss: Option<Loss>,
    learning_rate: Option<f32>,
    layers: Vec<LayerState>,
}

impl Model {
    /// Create an empty model taking `input_dim` features per sample
    pub fn new(input_dim: usize) -> Self {
        Model {
            layers: Vec::new(),
            input_dim,
            loss: None,
            optimizer: None,
            device: Device::Cpu,
        }
    }

    /// Append a layer, its input width must match the current output width
    pub fn add(&mut self, layer: Box<dyn Layer>) -> Result<()> {
        let expected = self.output_dim();
        if layer.input_dim() != expected {
            return Err(Error::Shape(format!(
                "layer {} takes {} inputs, previous layer produces {expected}",
                self.layers.len(),
                layer.input_dim()
            )));
        }
        self.layers.push(layer);
        Ok(())
    }

    pub fn compile(&mut self, optimizer: Optimizer, loss: Loss) {
        self.optimizer = Some(optimizer);
        self.loss = Some(loss);
    }

    pub fn is_compiled(&self) -> bool {
        self.optimizer.is_some() && self.loss.is_some()
    }

    pub fn set_device(&mut self, device: Device) {
        self.device = device;
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(self.input_dim, |l| l.output_dim())
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|l| l.parameter_count()).sum()
    }

    pub fn learning_rate(&self) -> Option<f32> {
        self.optimizer.as_ref().map(|o| o.learning_rate)
    }

    fn check_inputs(&self, x: &Array2<f32>, y: Option<&[usize]>) -> Result<()> {
        if x.ncols() != self.input_dim {
            return Err(Error::Shape(format!(
                "model takes {} features, got {}",
                self.input_dim,
                x.ncols()
            )));
        }
        if let Some(y) = y {
            if y.len() != x.nrows() {
                return Err(Error::Shape(format!(
                    "{} samples but {} labels",
                    x.nrows(),
                    y.len()
                )));
            }
            let classes = self.output_dim();
            if let Some(&bad) = y.iter().find(|&&c| c >= classes) {
                return Err(Error::Shape(format!(
                    "label {bad} out of range for {classes} outputs"
                )));
            }
        }
        Ok(())
    }

    /// Class probabilities, one row per sample
    pub fn predict(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        self.check_inputs(x, None)?;
        let mut output = Array2::zeros((x.nrows(), self.output_dim()));
        let mut start = 0;
        while start < x.nrows() {
            let end = (start + PREDICT_BATCH).min(x.nrows());
            let mut current = x.slice(s![start..end, ..]).to_owned();
            for layer in &self.layers {
                current = layer.infer(&current, &self.device);
            }
            output.slice_mut(s![start..end, ..]).assign(&current);
            start = end;
        }
        Ok(output)
    }

    pub fn evaluate(&self, x: &Array2<f32>, y: &[usize]) -> Result<Evaluation> {
        let loss = self.loss.ok_or(Error::NotCompiled)?;
        self.check_inputs(x, Some(y))?;
        let probabilities = self.predict(x)?;
        let value = loss.calculate(probabilities.view(), y, None)?;
        let predicted = argmax_rows(probabilities.view());
        Ok(Evaluation {
            loss: value as f64,
            accuracy: accuracy(&predicted, y),
        })
    }

    fn forward(&mut self, input: &Array2<f32>) -> Array2<f32> {
        let mut current = input.clone();
        for layer in &mut self.layers {
            current = layer.forward(&current, &self.device);
        }
        current
    }

    fn backward(&mut self, grad: Array2<f32>) {
        let mut current = grad;
        for layer in self.layers.iter_mut().rev() {
            current = layer.backward(&current, &self.device);
        }
    }

    fn update_parameters(&mut self) -> Result<()> {
        let optimizer = self.optimizer.as_mut().ok_or(Error::NotCompiled)?;
        let params: Vec<Param<'_>> = self.layers.iter_mut().flat_map(|l| l.params_mut()).collect();
        optimizer.apply(params);
        Ok(())
    }

    /// Runs one pass over a batch and updates the weights, returns the weighted batch loss
    pub fn train_batch(&mut self, x: &Array2<f32>, y: &[usize], weights: &[f32]) -> Result<(f32, usize)> {
        let loss = self.loss.ok_or(Error::NotCompiled)?;
        let probabilities = self.forward(x);
        let value = loss.calculate(probabilities.view(), y, Some(weights))?;
        let correct = argmax_rows(probabilities.view())
            .iter()
            .zip(y)
            .filter(|(p, t)| p == t)
            .count();
        let grad = loss.gradient(probabilities.view(), y, Some(weights))?;
        self.backward(grad);
        self.update_parameters()?;
        Ok((value, correct))
    }

    /// Mini-batch training.
    ///
    /// Each epoch logs `loss` and `accuracy` on the training data and, when
    /// `validation` is given, `val_loss` and `val_accuracy`. Callbacks then
    /// run in order and the logs as they leave the last callback are recorded.
    pub fn fit(
        &mut self,
        x: &Array2<f32>,
        y: &[usize],
        validation: Option<(&Array2<f32>, &[usize])>,
        options: &FitOptions,
        callbacks: &mut [&mut dyn Callback],
    ) -> Result<History> {
        if !self.is_compiled() {
            return Err(Error::NotCompiled);
        }
        self.check_inputs(x, Some(y))?;
        if let Some((vx, vy)) = validation {
            self.check_inputs(vx, Some(vy))?;
        }
        if x.nrows() == 0 {
            return Err(Error::Shape("empty training set".to_string()));
        }
        let batch_size = options.batch_size.max(1);

        let sample_weights: Vec<f32> = match &options.class_weight {
            Some(table) => y.iter().map(|c| table.get(c).copied().unwrap_or(1.0)).collect(),
            None => vec![1.0; y.len()],
        };

        for cb in callbacks.iter_mut() {
            cb.on_train_begin(self)?;
        }

        let mut rng = StdRng::seed_from_u64(options.seed);
        let mut indices: Vec<usize> = (0..x.nrows()).collect();
        let mut history = History::new();
        let n = x.nrows() as f64;

        for epoch in 0..options.epochs {
            let started = Instant::now();
            if options.shuffle {
                indices.shuffle(&mut rng);
            }

            let mut loss_sum = 0.0f64;
            let mut correct = 0usize;
            for chunk in indices.chunks(batch_size) {
                let xb = x.select(Axis(0), chunk);
                let yb: Vec<usize> = chunk.iter().map(|&i| y[i]).collect();
                let wb: Vec<f32> = chunk.iter().map(|&i| sample_weights[i]).collect();
                let (batch_loss, batch_correct) = self.train_batch(&xb, &yb, &wb)?;
                loss_sum += batch_loss as f64 * chunk.len() as f64;
                correct += batch_correct;
            }

            let mut logs = Logs::new();
            logs.insert("loss".to_string(), loss_sum / n);
            logs.insert("accuracy".to_string(), correct as f64 / n);
            if let Some((vx, vy)) = validation {
                let eval = self.evaluate(vx, vy)?;
                logs.insert("val_loss".to_string(), eval.loss);
                logs.insert("val_accuracy".to_string(), eval.accuracy);
            }

            let mut stop = false;
            for cb in callbacks.iter_mut() {
                if cb.on_epoch_end(epoch, self, &mut logs)? == CallbackAction::Stop {
                    stop = true;
                }
            }
            history.record(epoch, &logs);

            if options.verbose {
                let summary: Vec<String> = logs.iter().map(|(k, v)| format!("{k}: {v:.4}")).collect();
                println!(
                    "Epoch {}/{} - {:.0}s - {}",
                    epoch + 1,
                    options.epochs,
                    started.elapsed().as_secs_f64(),
                    summary.join(" - ")
                );
            }

            if stop {
                break;
            }
        }

        for cb in callbacks.iter_mut() {
            cb.on_train_end(self, &history)?;
        }
        Ok(history)
    }

    /// Writes architecture, weights and the learning rate as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = ModelFile {
            input_dim: self.input_dim,
            loss: self.loss,
            learning_rate: self.learning_rate(),
            layers: self.layers.iter().map(|l| l.state()).collect(),
        };
        let json = serde_json::to_string(&file)?;
        fs::write(path, json).map_err(|e| Error::io(path, e))
    }

    /// Reads a model written by [`Model::save`]; it comes back compiled with a fresh optimizer
    pub fn load(path: impl AsRef<Path>) -> Result<Model> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let file: ModelFile = serde_json::from_str(&json)?;
        let mut model = Model::new(file.input_dim);
        for state in file.layers {
            model.add(state.into_layer()?)?;
        }
        if let (Some(loss), Some(lr)) = (file.loss, file.learning_rate) {
            model.compile(Optimizer::adam(lr), loss);
        }
        Ok(model)
    }
}

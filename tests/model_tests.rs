use std::collections::BTreeMap;

use dnntune::callbacks::{Callback, CallbackAction, EarlyStopping, Mode, ModelCheckpoint, ValidationMetrics};
use dnntune::layers::{ActivationLayer, BatchNormLayer, DenseLayer, DropoutLayer, WeightInit};
use dnntune::{ActivationType, Error, FitOptions, Logs, Loss, Model, Optimizer};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Two well separated blobs in four dimensions
fn blobs(n: usize) -> (Array2<f32>, Vec<usize>) {
    let y: Vec<usize> = (0..n).map(|i| i % 2).collect();
    let x = Array2::from_shape_fn((n, 4), |(r, c)| {
        let centre = if y[r] == 0 { -1.0 } else { 1.0 };
        centre + ((r * 7 + c * 3) % 11) as f32 * 0.05 - 0.25
    });
    (x, y)
}

fn classifier(inputs: usize, hidden: usize, classes: usize) -> Model {
    let mut rng = StdRng::seed_from_u64(7);
    let mut model = Model::new(inputs);
    model
        .add(Box::new(DenseLayer::new(inputs, hidden, ActivationType::Linear, WeightInit::GlorotUniform, &mut rng)))
        .unwrap();
    model.add(Box::new(BatchNormLayer::new(hidden))).unwrap();
    model.add(Box::new(ActivationLayer::new(hidden, ActivationType::ReLU))).unwrap();
    model.add(Box::new(DropoutLayer::new(hidden, 0.1, 1))).unwrap();
    model
        .add(Box::new(DenseLayer::new(hidden, classes, ActivationType::Softmax, WeightInit::GlorotUniform, &mut rng)))
        .unwrap();
    model.compile(Optimizer::adam(1e-2), Loss::SparseCategoricalCrossEntropy);
    model
}

#[test]
fn test_parameter_count_accuracy() {
    let model = classifier(4, 8, 3);

    // Dense 4×8 + 8, batch norm 4×8, dense 8×3 + 3
    let expected = (4 * 8 + 8) + 4 * 8 + (8 * 3 + 3);
    assert_eq!(model.parameter_count(), expected);
    assert_eq!(model.input_dim(), 4);
    assert_eq!(model.output_dim(), 3);
}

#[test]
fn test_add_rejects_mismatched_layer() {
    let mut model = Model::new(4);
    let mut rng = StdRng::seed_from_u64(0);
    let layer = DenseLayer::new(5, 2, ActivationType::Linear, WeightInit::GlorotUniform, &mut rng);
    assert!(matches!(model.add(Box::new(layer)), Err(Error::Shape(_))));
}

#[test]
fn test_predict_returns_probabilities() {
    let model = classifier(4, 8, 3);
    let (x, _) = blobs(10);

    let output = model.predict(&x).unwrap();

    assert_eq!(output.dim(), (10, 3));
    for row in output.rows() {
        assert!((row.sum() - 1.0).abs() < 1e-5);
    }
    // Inference mode, so repeated calls agree
    assert_eq!(model.predict(&x).unwrap(), output);
}

#[test]
fn test_predict_invalid_input_size() {
    let model = classifier(4, 8, 2);
    let x = Array2::zeros((2, 3));
    assert!(matches!(model.predict(&x), Err(Error::Shape(_))));
}

#[test]
fn test_fit_requires_compile() {
    let mut model = Model::new(4);
    let (x, y) = blobs(8);
    let result = model.fit(&x, &y, None, &FitOptions::default(), &mut []);
    assert!(matches!(result, Err(Error::NotCompiled)));
}

#[test]
fn test_training_reduces_loss() {
    let mut model = classifier(4, 16, 2);
    let (x, y) = blobs(200);
    let before = model.evaluate(&x, &y).unwrap();

    let options = FitOptions {
        epochs: 20,
        batch_size: 32,
        ..FitOptions::default()
    };
    let history = model.fit(&x, &y, Some((&x, &y)), &options, &mut []).unwrap();

    assert_eq!(history.len(), 20);
    let losses = history.get("loss").unwrap();
    assert!(losses.iter().all(|l| l.is_finite()));
    assert!(history.get("val_accuracy").is_some());

    let after = model.evaluate(&x, &y).unwrap();
    assert!(after.loss < before.loss);
    assert!(after.accuracy > 0.9, "accuracy {}", after.accuracy);
}

#[test]
fn test_class_weight_changes_training() {
    let (x, y) = blobs(64);
    let options = FitOptions {
        epochs: 2,
        batch_size: 16,
        ..FitOptions::default()
    };
    let mut plain = classifier(4, 8, 2);
    plain.fit(&x, &y, None, &options, &mut []).unwrap();

    let weighted_options = FitOptions {
        class_weight: Some(BTreeMap::from([(0, 5.0), (1, 0.5)])),
        ..options
    };
    let mut weighted = classifier(4, 8, 2);
    weighted.fit(&x, &y, None, &weighted_options, &mut []).unwrap();

    assert_ne!(plain.predict(&x).unwrap(), weighted.predict(&x).unwrap());
}

#[test]
fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    let mut model = classifier(4, 8, 2);
    let (x, y) = blobs(32);
    model
        .fit(&x, &y, None, &FitOptions { epochs: 2, ..FitOptions::default() }, &mut [])
        .unwrap();

    model.save(&path).unwrap();
    let loaded = Model::load(&path).unwrap();

    assert!(loaded.is_compiled());
    assert_eq!(loaded.learning_rate(), Some(1e-2));
    assert_eq!(loaded.layers.len(), model.layers.len());
    let a = model.predict(&x).unwrap();
    let b = loaded.predict(&x).unwrap();
    assert!(a.iter().zip(b.iter()).all(|(p, q)| (p - q).abs() < 1e-6));
}

#[test]
fn test_metrics_callback_adds_scores() {
    let mut model = classifier(4, 8, 2);
    let (x, y) = blobs(40);
    let mut metrics = ValidationMetrics::new(x.clone(), y.clone()).unwrap().quiet();

    let options = FitOptions { epochs: 3, ..FitOptions::default() };
    let history = model.fit(&x, &y, Some((&x, &y)), &options, &mut [&mut metrics]).unwrap();

    for name in ["val_f1", "val_precision", "val_recall"] {
        let values = history.get(name).unwrap();
        assert_eq!(values.len(), 3);
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }
    let last = metrics.last_scores().unwrap();
    assert_eq!(history.last("val_f1"), Some(last.f1));
}

#[test]
fn test_checkpoint_saves_improving_epochs() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("w-epoch{epoch}-valf1{val_f1}.json");
    let mut model = classifier(4, 8, 2);
    let (x, y) = blobs(40);
    let mut metrics = ValidationMetrics::new(x.clone(), y.clone()).unwrap().quiet();
    let mut checkpoint = ModelCheckpoint::new(template.to_string_lossy(), "val_f1", Mode::Max);

    let options = FitOptions { epochs: 4, ..FitOptions::default() };
    let history = model
        .fit(&x, &y, Some((&x, &y)), &options, &mut [&mut metrics, &mut checkpoint])
        .unwrap();

    let (best_epoch, best) = checkpoint.best().unwrap();
    let f1 = history.get("val_f1").unwrap();
    assert_eq!(best, f1.iter().copied().fold(f64::NEG_INFINITY, f64::max));
    assert_eq!(f1[best_epoch], best);

    let saved = checkpoint.last_saved().unwrap();
    assert!(saved.exists());
    assert!(Model::load(saved).is_ok());
    let first = dir.path().join(format!("w-epoch01-valf1{:.4}.json", f1[0]));
    assert!(first.exists());
}

/// Reports a fixed sequence of values under `score`
struct Scripted {
    values: Vec<f64>,
}

impl Callback for Scripted {
    fn on_epoch_end(&mut self, epoch: usize, _model: &Model, logs: &mut Logs) -> dnntune::Result<CallbackAction> {
        logs.insert("score".to_string(), self.values[epoch]);
        Ok(CallbackAction::Continue)
    }
}

#[test]
fn test_early_stopping_after_patience() {
    let mut model = classifier(4, 8, 2);
    let (x, y) = blobs(16);
    let mut scripted = Scripted {
        values: vec![0.1, 0.5, 0.4, 0.45, 0.3, 0.9, 0.9, 0.9],
    };
    let mut stopping = EarlyStopping::new("score", Mode::Max, 3);

    let options = FitOptions { epochs: 8, ..FitOptions::default() };
    let history = model
        .fit(&x, &y, None, &options, &mut [&mut scripted, &mut stopping])
        .unwrap();

    // best at epoch 1, then three epochs without improvement
    assert_eq!(history.len(), 5);
    assert_eq!(stopping.stopped_epoch(), Some(4));
}

#[test]
fn test_early_stopping_min_delta() {
    let mut model = classifier(4, 8, 2);
    let (x, y) = blobs(16);
    let mut scripted = Scripted {
        values: vec![0.5, 0.49, 0.485, 0.2, 0.1],
    };
    let mut stopping = EarlyStopping::new("score", Mode::Min, 2).min_delta(0.05);

    let options = FitOptions { epochs: 5, ..FitOptions::default() };
    let history = model
        .fit(&x, &y, None, &options, &mut [&mut scripted, &mut stopping])
        .unwrap();

    // the small drops do not count as improvement
    assert_eq!(history.len(), 3);
}

#[test]
fn test_missing_metric_is_an_error() {
    let mut model = classifier(4, 8, 2);
    let (x, y) = blobs(16);
    let mut checkpoint = ModelCheckpoint::new("unused.json", "val_f1", Mode::Max);
    let result = model.fit(&x, &y, None, &FitOptions::default(), &mut [&mut checkpoint]);
    assert!(matches!(result, Err(Error::MissingMetric(name)) if name == "val_f1"));
}

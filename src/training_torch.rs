use std::path::Path;
use std::time::Instant;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tch::{nn, nn::OptimizerConfig, Device, Kind, Tensor};

use crate::batcher::{inference_batches, sequential_batches, shuffled_batches};
use crate::checkpoint::{create_save_path, CheckpointPaths};
use crate::config::{OptimizerKind, TctsConfig, GRAD_CLIP_VALUE};
use crate::dataset::{DatasetH, Segment, SegmentData, SegmentTensors};
use crate::error::{Result, TctsError};
use crate::model_torch::{weight_features, ForecastModel, WeightModel};

/// Validation and test MSE after one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub valid_loss: f64,
    pub test_loss: f64,
}

#[derive(Debug, Clone)]
pub struct FitReport {
    pub best_loss: f64,
    pub best_epoch: usize,
    pub epochs_run: usize,
    pub stopped_early: bool,
    pub history: Vec<EpochMetrics>,
    pub checkpoint: CheckpointPaths,
}

/// One score per input row, in input order.
#[derive(Debug, Clone, Default)]
pub struct Predictions {
    pub index: Vec<String>,
    pub scores: Vec<f32>,
}

impl Predictions {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> + '_ {
        self.index.iter().map(String::as_str).zip(self.scores.iter().copied())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochOutcome {
    Improved,
    Stalled,
    Stop,
}

/// Best validation loss so far and the stall counter driving early stopping.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best_loss: f64,
    best_epoch: usize,
    stop_round: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best_loss: f64::INFINITY,
            best_epoch: 0,
            stop_round: 0,
        }
    }

    /// Only a strictly lower loss counts as an improvement.
    pub fn observe(&mut self, epoch: usize, loss: f64) -> EpochOutcome {
        if loss < self.best_loss {
            self.best_loss = loss;
            self.best_epoch = epoch;
            self.stop_round = 0;
            EpochOutcome::Improved
        } else {
            self.stop_round += 1;
            if self.stop_round >= self.patience {
                EpochOutcome::Stop
            } else {
                EpochOutcome::Stalled
            }
        }
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    pub fn stop_round(&self) -> usize {
        self.stop_round
    }
}

/// Forecaster co-trained with a horizon-weighting network.
pub struct Tcts {
    config: TctsConfig,
    device: Device,
    fore_model: ForecastModel,
    weight_model: WeightModel,
    fore_optimizer: nn::Optimizer,
    weight_optimizer: nn::Optimizer,
    rng: StdRng,
    fitted: bool,
}

impl Tcts {
    pub fn new(config: TctsConfig) -> Result<Self> {
        // Reject bad options before any parameter is allocated.
        let options = config.validate()?;
        let device = config.device();

        info!("TCTS torch version...");
        info!(
            "TCTS parameters setting: d_feat={} step_len={} hidden_size={} num_layers={} dropout={} \
             n_epochs={} batch_size={} early_stop={} loss={:?} fore_optimizer={} weight_optimizer={} \
             output_dim={} fore_lr={} weight_lr={} steps={} gpu={:?} device={:?} seed={:?} target_label={}",
            config.d_feat,
            config.step_len,
            config.hidden_size,
            config.num_layers,
            config.dropout,
            config.n_epochs,
            config.batch_size,
            config.early_stop,
            options.loss,
            options.fore_optimizer,
            options.weight_optimizer,
            config.output_dim,
            config.fore_lr,
            config.weight_lr,
            config.steps,
            config.gpu,
            device,
            config.seed,
            config.target_label,
        );

        let rng = match config.seed {
            Some(seed) => {
                tch::manual_seed(seed as i64);
                StdRng::seed_from_u64(seed)
            }
            None => StdRng::from_os_rng(),
        };

        let fore_model = ForecastModel::new(device, &config);
        let weight_model = WeightModel::new(device, &config);
        let fore_optimizer = build_optimizer(options.fore_optimizer, fore_model.var_store(), config.fore_lr)?;
        let weight_optimizer =
            build_optimizer(options.weight_optimizer, weight_model.var_store(), config.weight_lr)?;

        Ok(Self {
            config,
            device,
            fore_model,
            weight_model,
            fore_optimizer,
            weight_optimizer,
            rng,
            fitted: false,
        })
    }

    /// Rebuild both networks from a previous run's checkpoint, ready to predict.
    pub fn from_checkpoint(config: TctsConfig, base: &Path) -> Result<Self> {
        let mut model = Self::new(config)?;
        model.load_checkpoint(&CheckpointPaths::new(base))?;
        model.fitted = true;
        Ok(model)
    }

    pub fn config(&self) -> &TctsConfig {
        &self.config
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    pub fn forecast_model(&self) -> &ForecastModel {
        &self.fore_model
    }

    pub fn weight_model(&self) -> &WeightModel {
        &self.weight_model
    }

    /// One epoch of co-training: `steps` forecast passes over train, then one weight pass over valid.
    pub(crate) fn train_epoch(&mut self, train: &SegmentTensors, valid: &SegmentTensors) -> Result<()> {
        let batch_size = self.config.batch_size;

        // Frozen reference: supplies the weighting features while the live model moves.
        let mut init_fore_model = self.fore_model.try_clone()?;
        init_fore_model.set_trainable(false);

        self.weight_model.set_trainable(false);
        self.fore_model.set_trainable(true);

        let batches = shuffled_batches(train.rows(), batch_size, &mut self.rng);
        debug!("forecast phase: {} steps x {} batches", self.config.steps, batches.len());
        for _ in 0..self.config.steps {
            for rows in &batches {
                let (feature, label) = train.batch(rows, self.device);
                let (pred, weight) = self.forecast_forward(&init_fore_model, &feature, &label);

                let loss = selected_horizon_loss(&pred, &label, &weight);

                self.fore_optimizer.zero_grad();
                loss.backward();
                clip_grad_value(self.fore_model.var_store(), GRAD_CLIP_VALUE);
                self.fore_optimizer.step();
            }
        }

        // Fix the forecaster, fit the weighting network on valid.
        self.fore_model.set_trainable(false);
        self.weight_model.set_trainable(true);

        let batches = shuffled_batches(valid.rows(), batch_size, &mut self.rng);
        debug!("weight phase: {} batches", batches.len());
        for rows in &batches {
            let (feature, label) = valid.batch(rows, self.device);

            let pred = self.fore_model.forward(&feature, true);
            let weight_feature = weight_features(&feature, &label, &pred);
            let weight = self.weight_model.forward(&weight_feature, true);

            let loss = weight_policy_loss(&pred, &label, &weight);

            self.weight_optimizer.zero_grad();
            loss.backward();
            clip_grad_value(self.weight_model.var_store(), GRAD_CLIP_VALUE);
            self.weight_optimizer.step();
        }

        Ok(())
    }

    /// Live prediction and horizon weights for one forecast-phase batch.
    /// The weighting features are built from `reference`, never from the live forecaster.
    pub(crate) fn forecast_forward(
        &self,
        reference: &ForecastModel,
        feature: &Tensor,
        label: &Tensor,
    ) -> (Tensor, Tensor) {
        let init_pred = tch::no_grad(|| reference.forward(feature, false));
        let pred = self.fore_model.forward(feature, true);

        let weight_feature = weight_features(feature, label, &init_pred);
        let weight = self.weight_model.forward(&weight_feature, true);
        (pred, weight)
    }

    /// Mean over full batches of the MSE against label column `|target_label|`; NaN without a full batch.
    pub(crate) fn test_epoch(&self, data: &SegmentTensors) -> f64 {
        let label_col = self.config.eval_label();
        let losses: Vec<f64> = tch::no_grad(|| {
            sequential_batches(data.rows(), self.config.batch_size)
                .iter()
                .map(|rows| {
                    let (feature, label) = data.batch(rows, self.device);
                    let pred = self.fore_model.forward(&feature, false);
                    (pred - label.select(1, label_col))
                        .pow_tensor_scalar(2)
                        .mean(Kind::Float)
                        .double_value(&[])
                })
                .collect()
        });

        if losses.is_empty() {
            return f64::NAN;
        }
        losses.iter().sum::<f64>() / losses.len() as f64
    }

    pub fn fit<D: DatasetH + ?Sized>(&mut self, dataset: &D, save_path: Option<&Path>) -> Result<FitReport> {
        let train = self.prepare_labelled(dataset, Segment::Train, true)?;
        let valid = self.prepare_labelled(dataset, Segment::Valid, true)?;
        let test = self.prepare_labelled(dataset, Segment::Test, false)?;

        let save_path = create_save_path(save_path)?;
        let checkpoint = CheckpointPaths::new(&save_path);

        let mut stopper = EarlyStopping::new(self.config.early_stop);
        let mut history = Vec::new();
        let mut stopped_early = false;

        for epoch in 0..self.config.n_epochs {
            let started = Instant::now();
            info!("Epoch: {}", epoch);

            debug!("training...");
            self.train_epoch(&train, &valid)?;
            debug!("evaluating...");
            let valid_loss = self.test_epoch(&valid);
            let test_loss = self.test_epoch(&test);
            history.push(EpochMetrics {
                epoch,
                valid_loss,
                test_loss,
            });

            info!(
                "valid {:.6}, test {:.6} ({:.1}s)",
                valid_loss,
                test_loss,
                started.elapsed().as_secs_f64()
            );

            match stopper.observe(epoch, valid_loss) {
                EpochOutcome::Improved => {
                    self.save_checkpoint(&checkpoint)?;
                    info!("saved best model to {}", save_path.display());
                }
                EpochOutcome::Stalled => {
                    debug!("no improvement for {} epoch(s)", stopper.stop_round());
                }
                EpochOutcome::Stop => {
                    warn!("early stop after {} epochs without improvement", stopper.stop_round());
                    stopped_early = true;
                    break;
                }
            }
        }

        info!("best loss: {:.6} @ {}", stopper.best_loss(), stopper.best_epoch());
        self.load_checkpoint(&checkpoint)?;
        self.fitted = true;

        Ok(FitReport {
            best_loss: stopper.best_loss(),
            best_epoch: stopper.best_epoch(),
            epochs_run: history.len(),
            stopped_early,
            history,
            checkpoint,
        })
    }

    /// Forecast every row of the test segment.
    pub fn predict<D: DatasetH + ?Sized>(&self, dataset: &D) -> Result<Predictions> {
        if !self.fitted {
            return Err(TctsError::NotFitted);
        }

        let test = dataset.prepare(Segment::Test)?;
        self.check_features(Segment::Test, &test)?;
        let features = test.feature_tensor();

        let mut scores = Vec::with_capacity(test.len());
        for range in inference_batches(test.len(), self.config.batch_size) {
            let x = features
                .narrow(0, range.start as i64, range.len() as i64)
                .to_kind(Kind::Float)
                .to_device(self.device);
            let pred = tch::no_grad(|| self.fore_model.forward(&x, false));
            scores.extend(Vec::<f32>::try_from(&pred.to_device(Device::Cpu))?);
        }

        Ok(Predictions {
            index: test.index,
            scores,
        })
    }

    fn save_checkpoint(&self, paths: &CheckpointPaths) -> Result<()> {
        self.fore_model
            .save(&paths.fore_model)
            .map_err(|source| TctsError::Checkpoint {
                path: paths.fore_model.clone(),
                source,
            })?;
        self.weight_model
            .save(&paths.weight_model)
            .map_err(|source| TctsError::Checkpoint {
                path: paths.weight_model.clone(),
                source,
            })
    }

    fn load_checkpoint(&mut self, paths: &CheckpointPaths) -> Result<()> {
        self.fore_model
            .load(&paths.fore_model)
            .map_err(|source| TctsError::Checkpoint {
                path: paths.fore_model.clone(),
                source,
            })?;
        self.weight_model
            .load(&paths.weight_model)
            .map_err(|source| TctsError::Checkpoint {
                path: paths.weight_model.clone(),
                source,
            })
    }

    fn check_features(&self, segment: Segment, data: &SegmentData) -> Result<()> {
        let expected = self.config.feature_width() as usize;
        if data.feature_dim != expected {
            return Err(TctsError::Dataset(format!(
                "{} has {} feature columns, expected d_feat * step_len = {}",
                segment, data.feature_dim, expected
            )));
        }
        Ok(())
    }

    fn prepare_labelled<D: DatasetH + ?Sized>(
        &self,
        dataset: &D,
        segment: Segment,
        needs_full_batch: bool,
    ) -> Result<SegmentTensors> {
        let data = dataset.prepare(segment)?;
        self.check_features(segment, &data)?;
        if data.label_dim != self.config.output_dim as usize {
            return Err(TctsError::Dataset(format!(
                "{} has {} label columns, expected output_dim = {}",
                segment, data.label_dim, self.config.output_dim
            )));
        }
        if needs_full_batch && data.len() < self.config.batch_size {
            return Err(TctsError::InsufficientData {
                segment,
                rows: data.len(),
                batch_size: self.config.batch_size,
            });
        }
        SegmentTensors::from_segment(&data)
    }
}

fn build_optimizer(kind: OptimizerKind, vs: &nn::VarStore, lr: f64) -> Result<nn::Optimizer> {
    let opt = match kind {
        OptimizerKind::Adam => nn::Adam::default().build(vs, lr)?,
        OptimizerKind::Gd => nn::Sgd::default().build(vs, lr)?,
    };
    Ok(opt)
}

/// Squared error against the label at each row's highest-weighted horizon, averaged over the batch.
pub(crate) fn selected_horizon_loss(pred: &Tensor, label: &Tensor, weight: &Tensor) -> Tensor {
    let loc = weight.argmax(1, false);
    let chosen = label.gather(1, &loc.unsqueeze(1), false).squeeze_dim(1);
    (pred - chosen).pow_tensor_scalar(2).mean(Kind::Float)
}

/// `mean(-valid_loss * log(weight[argmax]))`, where `valid_loss` is the MSE against horizon 0.
pub(crate) fn weight_policy_loss(pred: &Tensor, label: &Tensor, weight: &Tensor) -> Tensor {
    let loc = weight.argmax(1, false);
    let valid_loss = (pred - label.select(1, 0)).pow_tensor_scalar(2).mean(Kind::Float);
    let chosen = weight.gather(1, &loc.unsqueeze(1), false).squeeze_dim(1);
    (-valid_loss * chosen.log()).mean(Kind::Float)
}

/// Clamp every gradient component of `vs` to `[-clip_value, clip_value]` in place.
pub(crate) fn clip_grad_value(vs: &nn::VarStore, clip_value: f64) {
    tch::no_grad(|| {
        for var in vs.trainable_variables() {
            let mut grad = var.grad();
            if grad.defined() {
                let _ = grad.clamp_(-clip_value, clip_value);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{MemoryDataset, SyntheticDataset};

    fn tiny_config() -> TctsConfig {
        TctsConfig {
            d_feat: 2,
            step_len: 4,
            hidden_size: 8,
            num_layers: 2,
            n_epochs: 2,
            batch_size: 8,
            early_stop: 5,
            output_dim: 3,
            fore_lr: 1e-2,
            weight_lr: 1e-2,
            steps: 1,
            gpu: None,
            seed: Some(11),
            ..Default::default()
        }
    }

    fn snapshot(vs: &nn::VarStore) -> Vec<Tensor> {
        let mut vars: Vec<(String, Tensor)> = vs.variables().into_iter().collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        vars.into_iter().map(|(_, t)| t.detach().copy()).collect()
    }

    fn unchanged(before: &[Tensor], after: &[Tensor]) -> bool {
        before.iter().zip(after).all(|(a, b)| a.allclose(b, 0.0, 0.0, false))
    }

    #[test]
    fn test_selected_horizon_loss_uses_argmax_label() {
        let pred = Tensor::from_slice(&[1.0f32, 3.0]);
        let label = Tensor::from_slice(&[0.0f32, 5.0, 1.0, 2.0, 0.0, 9.0]).reshape(&[2, 3]);
        let weight = Tensor::from_slice(&[0.1f32, 0.2, 0.7, 0.6, 0.3, 0.1]).reshape(&[2, 3]);
        // Row 0 picks horizon 2 (label 1.0), row 1 picks horizon 0 (label 2.0).
        let loss = selected_horizon_loss(&pred, &label, &weight).double_value(&[]);
        assert!((loss - 0.5).abs() < 1e-6, "loss {}", loss);
    }

    #[test]
    fn test_weight_policy_loss_keeps_sign_convention() {
        let pred = Tensor::from_slice(&[1.0f32, 3.0]);
        let label = Tensor::from_slice(&[0.0f32, 5.0, 1.0, 2.0, 0.0, 9.0]).reshape(&[2, 3]);
        let weight = Tensor::from_slice(&[0.1f32, 0.2, 0.7, 0.6, 0.3, 0.1]).reshape(&[2, 3]);
        // valid_loss = ((1-0)^2 + (3-2)^2) / 2 = 1
        let expected = (-(1.0f64) * 0.7f64.ln() + -(1.0f64) * 0.6f64.ln()) / 2.0;
        let got = weight_policy_loss(&pred, &label, &weight).double_value(&[]);
        assert!((got - expected).abs() < 1e-5, "got {} expected {}", got, expected);
        assert!(got > 0.0);
    }

    #[test]
    fn test_clip_grad_value_bounds_each_component() {
        let vs = nn::VarStore::new(Device::Cpu);
        let w = vs.root().var("w", &[4], nn::Init::Const(1.0));
        let coeff = Tensor::from_slice(&[10.0f32, -20.0, 0.5, -2.9]);
        (&w * &coeff).sum(Kind::Float).backward();

        clip_grad_value(&vs, 3.0);

        let grad = Vec::<f32>::try_from(&w.grad()).unwrap();
        assert_eq!(grad, vec![3.0, -3.0, 0.5, -2.9]);
        assert!(grad.iter().all(|g| g.abs() <= 3.0));
    }

    #[test]
    fn test_early_stopping_sequence() {
        let losses = [0.9, 0.5, 0.6, 0.5, 0.7];
        let mut stopper = EarlyStopping::new(3);
        let outcomes: Vec<EpochOutcome> = losses
            .iter()
            .enumerate()
            .map(|(epoch, loss)| stopper.observe(epoch, *loss))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                EpochOutcome::Improved,
                EpochOutcome::Improved,
                EpochOutcome::Stalled,
                EpochOutcome::Stalled,
                EpochOutcome::Stop,
            ]
        );
        assert_eq!(stopper.best_epoch(), 1);
        assert!((stopper.best_loss() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_early_stopping_nan_never_improves() {
        let mut stopper = EarlyStopping::new(2);
        assert_eq!(stopper.observe(0, f64::NAN), EpochOutcome::Stalled);
        assert_eq!(stopper.observe(1, f64::NAN), EpochOutcome::Stop);
    }

    #[test]
    fn test_unsupported_optimizer_fails_at_construction() {
        for (fore, weight) in [("sgd", "adam"), ("adam", "rmsprop"), ("adagrad", "gd")] {
            let cfg = TctsConfig {
                fore_optimizer: fore.to_string(),
                weight_optimizer: weight.to_string(),
                ..tiny_config()
            };
            match Tcts::new(cfg) {
                Err(TctsError::UnsupportedConfig(msg)) => assert!(msg.contains("optimizer")),
                Err(other) => panic!("unexpected error {:?}", other),
                Ok(_) => panic!("{}/{} should be rejected", fore, weight),
            }
        }
    }

    #[test]
    fn test_predict_before_fit_is_invalid_state() {
        let model = Tcts::new(tiny_config()).unwrap();
        let ds = SyntheticDataset::new(2, 4, 3);
        assert!(matches!(model.predict(&ds), Err(TctsError::NotFitted)));
    }

    #[test]
    fn test_each_phase_updates_only_its_network() {
        let cfg = tiny_config();
        let mut model = Tcts::new(cfg).unwrap();
        let ds = SyntheticDataset::new(2, 4, 3).with_rows(16, 16, 8);
        let train = SegmentTensors::from_segment(&ds.prepare(Segment::Train).unwrap()).unwrap();
        let valid = SegmentTensors::from_segment(&ds.prepare(Segment::Valid).unwrap()).unwrap();
        let empty = SegmentTensors::from_segment(&ds.clone().with_rows(0, 0, 0).prepare(Segment::Valid).unwrap()).unwrap();

        // Forecast phase only: the weighting network must not move.
        let fore_before = snapshot(model.forecast_model().var_store());
        let weight_before = snapshot(model.weight_model().var_store());
        model.train_epoch(&train, &empty).unwrap();
        assert!(unchanged(&weight_before, &snapshot(model.weight_model().var_store())));
        assert!(!unchanged(&fore_before, &snapshot(model.forecast_model().var_store())));

        // Weight phase only: the forecaster must not move.
        let fore_before = snapshot(model.forecast_model().var_store());
        let weight_before = snapshot(model.weight_model().var_store());
        model.train_epoch(&empty, &valid).unwrap();
        assert!(unchanged(&fore_before, &snapshot(model.forecast_model().var_store())));
        assert!(!unchanged(&weight_before, &snapshot(model.weight_model().var_store())));
    }

    #[test]
    fn test_epoch_gradients_are_clipped() {
        let cfg = TctsConfig {
            fore_lr: 0.0,
            weight_lr: 0.0,
            fore_optimizer: "gd".to_string(),
            weight_optimizer: "gd".to_string(),
            ..tiny_config()
        };
        let mut model = Tcts::new(cfg).unwrap();
        // Large labels force large raw gradients.
        let mut ds = SyntheticDataset::new(2, 4, 3).with_rows(8, 8, 8).prepare(Segment::Train).unwrap();
        ds.labels.iter_mut().for_each(|l| *l *= 1000.0);
        let data = SegmentTensors::from_segment(&ds).unwrap();
        model.train_epoch(&data, &data).unwrap();

        for vs in [model.forecast_model().var_store(), model.weight_model().var_store()] {
            for var in vs.trainable_variables() {
                let grad = var.grad();
                if grad.defined() {
                    let max = grad.abs().max().double_value(&[]);
                    assert!(max <= GRAD_CLIP_VALUE + 1e-6, "gradient component {} above bound", max);
                }
            }
        }
    }

    #[test]
    fn test_forecast_weights_follow_reference_not_live_model() {
        let model = Tcts::new(tiny_config()).unwrap();
        let ds = SyntheticDataset::new(2, 4, 3).with_rows(8, 0, 0);
        let data = SegmentTensors::from_segment(&ds.prepare(Segment::Train).unwrap()).unwrap();
        let rows: Vec<i64> = (0..8).collect();
        let (feature, label) = data.batch(&rows, Device::Cpu);

        // Move the live forecaster away from its snapshot.
        let reference = model.forecast_model().try_clone().unwrap();
        tch::no_grad(|| {
            for mut var in model.forecast_model().var_store().trainable_variables() {
                let _ = var.fill_(0.5);
            }
        });

        let (pred, weight) = model.forecast_forward(&reference, &feature, &label);

        let ref_pred = tch::no_grad(|| reference.forward(&feature, false));
        let live_pred = tch::no_grad(|| model.forecast_model().forward(&feature, false));
        assert!(!ref_pred.allclose(&live_pred, 1e-4, 1e-4, false));
        assert!(pred.detach().allclose(&live_pred, 1e-5, 1e-5, false));

        let expected = tch::no_grad(|| {
            model
                .weight_model()
                .forward(&weight_features(&feature, &label, &ref_pred), false)
        });
        let from_live = tch::no_grad(|| {
            model
                .weight_model()
                .forward(&weight_features(&feature, &label, &live_pred), false)
        });
        assert!(!from_live.allclose(&expected, 1e-6, 1e-6, false));
        assert!(weight.detach().allclose(&expected, 1e-6, 1e-6, false));

        let picked = Vec::<i64>::try_from(&weight.argmax(1, false)).unwrap();
        let expected_picked = Vec::<i64>::try_from(&expected.argmax(1, false)).unwrap();
        assert_eq!(picked, expected_picked);
    }

    fn constant_segment(prefix: &str, rows: usize, width: usize, label_dim: usize, label: f32) -> SegmentData {
        SegmentData::new(
            (0..rows).map(|i| format!("{}-{:03}", prefix, i)).collect(),
            vec![0.5; rows * width],
            width,
            vec![label; rows * label_dim],
            label_dim,
        )
        .unwrap()
    }

    #[test]
    fn test_fit_restores_best_epoch_after_drift() {
        // Train pulls the forecast towards +5 while valid sits at -5, so every
        // epoch after the first makes the validation loss worse.
        let cfg = TctsConfig {
            n_epochs: 10,
            early_stop: 3,
            fore_optimizer: "gd".to_string(),
            weight_optimizer: "gd".to_string(),
            fore_lr: 1e-2,
            weight_lr: 0.0,
            ..tiny_config()
        };
        let width = cfg.feature_width() as usize;
        let horizons = cfg.output_dim as usize;
        let ds = MemoryDataset {
            train: constant_segment("train", 16, width, horizons, 5.0),
            valid: constant_segment("valid", 16, width, horizons, -5.0),
            test: constant_segment("test", 8, width, horizons, 0.0),
        };
        let valid = SegmentTensors::from_segment(&ds.valid).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut model = Tcts::new(cfg).unwrap();
        let report = model.fit(&ds, Some(&dir.path().join("drift"))).unwrap();

        assert!(report.best_epoch + 1 < report.epochs_run, "{:?}", report.history);
        let best = report.history[report.best_epoch].valid_loss;
        let last = report.history[report.epochs_run - 1].valid_loss;
        assert!(last > best);

        let restored = model.test_epoch(&valid);
        assert!((restored - best).abs() < 1e-9, "restored {} best {}", restored, best);
        assert!((restored - last).abs() > 1e-6);
    }

    #[test]
    fn test_test_epoch_without_full_batch_is_nan() {
        let model = Tcts::new(tiny_config()).unwrap();
        let ds = SyntheticDataset::new(2, 4, 3).with_rows(0, 0, 3);
        let test = SegmentTensors::from_segment(&ds.prepare(Segment::Test).unwrap()).unwrap();
        assert!(model.test_epoch(&test).is_nan());
    }
}

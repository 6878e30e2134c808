use std::path::Path;

use tch::{nn, nn::Module, nn::RNN, Device, Tensor};

use crate::config::TctsConfig;

/// GRU forecaster: flattened `[N, d_feat * T]` window in, one scalar per row out.
pub struct ForecastModel {
    vs: nn::VarStore,
    rnn: Vec<nn::GRU>,
    fc_out: nn::Linear,
    d_feat: i64,
    hidden_size: i64,
    num_layers: i64,
    dropout: f64,
}

impl ForecastModel {
    pub fn new(device: Device, config: &TctsConfig) -> Self {
        Self::build(device, config.d_feat, config.hidden_size, config.num_layers, config.dropout)
    }

    fn build(device: Device, d_feat: i64, hidden_size: i64, num_layers: i64, dropout: f64) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();

        // One single-layer GRU per level so inter-layer dropout follows the train flag.
        let gru_config = nn::RNNConfig {
            batch_first: true,
            ..Default::default()
        };
        let rnn = (0..num_layers)
            .map(|layer| {
                let in_dim = if layer == 0 { d_feat } else { hidden_size };
                nn::gru(&root / format!("rnn_{}", layer), in_dim, hidden_size, gru_config)
            })
            .collect();
        let fc_out = nn::linear(&root / "fc_out", hidden_size, 1, Default::default());

        Self {
            vs,
            rnn,
            fc_out,
            d_feat,
            hidden_size,
            num_layers,
            dropout,
        }
    }

    pub fn forward(&self, input: &Tensor, train: bool) -> Tensor {
        let n = input.size()[0];
        // [N, F*T] -> [N, F, T] -> [N, T, F]
        let mut x = input.reshape(&[n, self.d_feat, -1]).permute(&[0, 2, 1]);
        for (layer, gru) in self.rnn.iter().enumerate() {
            if layer > 0 && train && self.dropout > 0.0 {
                x = x.dropout(self.dropout, true);
            }
            x = gru.seq(&x).0;
        }
        let last = x.select(1, -1);
        self.fc_out.forward(&last).squeeze_dim(-1)
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        if trainable {
            self.vs.unfreeze();
        } else {
            self.vs.freeze();
        }
    }

    /// Independent copy of the parameters; later updates to `self` do not leak into it.
    pub fn try_clone(&self) -> Result<Self, tch::TchError> {
        let mut copy = Self::build(
            self.vs.device(),
            self.d_feat,
            self.hidden_size,
            self.num_layers,
            self.dropout,
        );
        copy.vs.copy(&self.vs)?;
        Ok(copy)
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn save(&self, path: &Path) -> Result<(), tch::TchError> {
        self.vs.save(path)
    }

    pub fn load(&mut self, path: &Path) -> Result<(), tch::TchError> {
        self.vs.load(path)
    }
}

/// Horizon selector: MLP + softmax over `output_dim` candidate horizons.
pub struct WeightModel {
    vs: nn::VarStore,
    hidden: Vec<nn::Linear>,
    fc_out: nn::Linear,
    dropout: f64,
}

impl WeightModel {
    pub fn new(device: Device, config: &TctsConfig) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();

        let hidden = (0..config.num_layers)
            .map(|i| {
                let in_dim = if i == 0 { config.weight_input_width() } else { config.hidden_size };
                nn::linear(&root / format!("fc_{}", i), in_dim, config.hidden_size, Default::default())
            })
            .collect();
        let fc_out = nn::linear(
            &root / "fc_out",
            config.hidden_size,
            config.output_dim,
            Default::default(),
        );

        Self {
            vs,
            hidden,
            fc_out,
            dropout: config.dropout,
        }
    }

    /// Returns `[N, output_dim]`; every row sums to one.
    pub fn forward(&self, input: &Tensor, train: bool) -> Tensor {
        let mut x = input.shallow_clone();
        for (i, layer) in self.hidden.iter().enumerate() {
            if i > 0 && train && self.dropout > 0.0 {
                x = x.dropout(self.dropout, true);
            }
            x = layer.forward(&x).relu();
        }
        self.fc_out.forward(&x).softmax(1, tch::Kind::Float)
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        if trainable {
            self.vs.unfreeze();
        } else {
            self.vs.freeze();
        }
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn save(&self, path: &Path) -> Result<(), tch::TchError> {
        self.vs.save(path)
    }

    pub fn load(&mut self, path: &Path) -> Result<(), tch::TchError> {
        self.vs.load(path)
    }
}

/// Weighting-network input: `[features | pred - label_h | labels | pred]`.
pub fn weight_features(feature: &Tensor, label: &Tensor, pred: &Tensor) -> Tensor {
    let pred_col = pred.reshape(&[-1, 1]);
    let dis = &pred_col - label;
    Tensor::cat(&[feature, &dis, label, &pred_col], 1)
}

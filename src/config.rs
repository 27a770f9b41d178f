//! 実行設定。
//!
//! 設定ファイル (TOML の `[ai]` テーブル) を読み、コマンドライン引数で個別に上書きします。
//! 必須のハイパーパラメータが揃っているかは、テンソルを確保する前に検証します。
//!
//! ```toml
//! [ai]
//! hidden_layers = [8, 8]
//! optimizer_step = 0.01
//! max_iterations = 500
//! activation = "gelu"
//! ```

use crate::error::{Error, Result};
use crate::model::{Activation, ModelConfig};
use crate::pinn::{GRADIENT_TARGET, LossWeights, PhysicsLoss};
use crate::sampler::{Sampler, TRAINING_FRACTION};
use crate::training::TrainerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 損失をログに出す間隔の既定値
pub const REPORT_INTERVAL: usize = 100;

/// 学習のハイパーパラメータ。実行開始時に一度だけ与えられます。
#[derive(Debug, Clone, PartialEq)]
pub struct Hyperparameters {
    pub hidden_layers: Vec<usize>,
    pub optimizer_step: f64,
    pub max_iterations: usize,
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<()> {
        ModelConfig::new(self.hidden_layers.clone()).validate()?;
        if !(self.optimizer_step.is_finite() && self.optimizer_step > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "optimizer_step は正の値で指定してください: {}",
                self.optimizer_step
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidConfig(
                "max_iterations は1以上で指定してください".to_string(),
            ));
        }
        Ok(())
    }

    /// 隠れ層の幅をカンマ区切りで表した文字列 (例: `8,8`)。
    pub fn hidden_layers_label(&self) -> String {
        self.hidden_layers
            .iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// `[ai]` テーブルの内容。すべて省略可能で、コマンドライン引数からも同じ形で作ります。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AiSettings {
    pub hidden_layers: Option<Vec<usize>>,
    pub optimizer_step: Option<f64>,
    pub max_iterations: Option<usize>,
    pub activation: Option<Activation>,
    pub data_weight: Option<f64>,
    pub gradient_weight: Option<f64>,
    pub gradient_target: Option<f64>,
    pub training_fraction: Option<f64>,
    pub seed: Option<u64>,
    pub report_interval: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    ai: AiSettings,
}

impl AiSettings {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        Ok(file.ai)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// `overrides` で指定された値を優先して統合します。
    pub fn merge(self, overrides: AiSettings) -> AiSettings {
        AiSettings {
            hidden_layers: overrides.hidden_layers.or(self.hidden_layers),
            optimizer_step: overrides.optimizer_step.or(self.optimizer_step),
            max_iterations: overrides.max_iterations.or(self.max_iterations),
            activation: overrides.activation.or(self.activation),
            data_weight: overrides.data_weight.or(self.data_weight),
            gradient_weight: overrides.gradient_weight.or(self.gradient_weight),
            gradient_target: overrides.gradient_target.or(self.gradient_target),
            training_fraction: overrides.training_fraction.or(self.training_fraction),
            seed: overrides.seed.or(self.seed),
            report_interval: overrides.report_interval.or(self.report_interval),
        }
    }

    /// 必須項目を確認し、既定値を補って実行設定を作ります。
    pub fn resolve(self) -> Result<RunConfig> {
        let missing = |name: &str| Error::InvalidConfig(format!("{name} が指定されていません"));
        let hyper = Hyperparameters {
            hidden_layers: self.hidden_layers.ok_or_else(|| missing("hidden_layers"))?,
            optimizer_step: self.optimizer_step.ok_or_else(|| missing("optimizer_step"))?,
            max_iterations: self.max_iterations.ok_or_else(|| missing("max_iterations"))?,
        };
        hyper.validate()?;

        let weights = LossWeights {
            data: self.data_weight.unwrap_or(1.0),
            gradient: self.gradient_weight.unwrap_or(1.0),
        };
        if [weights.data, weights.gradient]
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(Error::InvalidConfig(format!(
                "損失の重みは0以上の有限値で指定してください: {weights:?}"
            )));
        }
        let gradient_target = self.gradient_target.unwrap_or(GRADIENT_TARGET);
        if !gradient_target.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "gradient_target が不正です: {gradient_target}"
            )));
        }
        let training_fraction = self.training_fraction.unwrap_or(TRAINING_FRACTION);
        Sampler::new(training_fraction)?;

        Ok(RunConfig {
            hyper,
            activation: self.activation.unwrap_or_default(),
            loss: PhysicsLoss {
                weights,
                gradient_target,
            },
            training_fraction,
            seed: self.seed,
            report_interval: self.report_interval.unwrap_or(REPORT_INTERVAL).max(1),
        })
    }
}

/// 検証済みの実行設定。
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub hyper: Hyperparameters,
    pub activation: Activation,
    pub loss: PhysicsLoss,
    pub training_fraction: f64,
    pub seed: Option<u64>,
    pub report_interval: usize,
}

impl RunConfig {
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new(self.hyper.hidden_layers.clone()).with_activation(self.activation)
    }

    pub fn sampler(&self) -> Result<Sampler> {
        let sampler = Sampler::new(self.training_fraction)?;
        Ok(match self.seed {
            Some(seed) => sampler.with_seed(seed),
            None => sampler,
        })
    }

    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            optimizer_step: self.hyper.optimizer_step,
            max_iterations: self.hyper.max_iterations,
            loss: self.loss,
            report_interval: self.report_interval,
        }
    }
}

use crate::error::Error;
use crate::model::Model;
use crate::pinn::PhysicsLoss;
use crate::sampler::TrainingData;
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer, RmsPropConfig};
use burn::tensor::backend::AutodiffBackend;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// 学習ループの設定。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainerConfig {
    pub optimizer_step: f64,
    pub max_iterations: usize,
    pub loss: PhysicsLoss,
    /// 損失を info レベルで出力する間隔 (エポック数)。0 なら最初のエポックのみ
    pub report_interval: usize,
}

/// 1エポック分の損失の記録。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochRecord {
    pub epoch: usize,
    pub data_loss: f64,
    pub gradient_loss: f64,
    pub total_loss: f64,
}

/// エポックごとの記録を受け取る側 (学習ログなど)。
pub trait EpochObserver {
    fn on_epoch(&mut self, record: &EpochRecord) -> crate::Result<()>;
}

impl EpochObserver for () {
    fn on_epoch(&mut self, _record: &EpochRecord) -> crate::Result<()> {
        Ok(())
    }
}

/// エポックの合間に確認される中断フラグ。
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 学習ループが終了した理由。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 指定エポック数をすべて実行した
    Exhausted,
    /// 中断要求により `completed` エポックで停止した
    Cancelled { completed: usize },
    /// `epoch` で損失が有限でなくなった
    NonFiniteLoss { epoch: usize },
}

/// 学習結果。最良モデルはパラメータ更新前のスナップショットです。
#[derive(Debug)]
pub struct TrainingOutcome<B: AutodiffBackend> {
    pub best: Model<B::InnerBackend>,
    /// 最良モデルの合計損失。一度も有限の損失が得られなければ `+∞`
    pub min_loss: f64,
    pub best_epoch: Option<usize>,
    pub history: Vec<EpochRecord>,
    pub stop: StopReason,
    /// 記録側で発生した最初のエラー。発生後も学習は継続します。
    pub observer_error: Option<Error>,
}

/// 物理情報損失による学習ループ。
#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainerConfig,
    cancel: CancelToken,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 学習を実行します。
    ///
    /// 各エポックで損失の計算、逆伝播、RMSprop による更新、記録の出力、最良モデルの更新を
    /// この順に行います。収束判定はなく、`max_iterations` エポックで終了します。
    pub fn train<B: AutodiffBackend>(
        &self,
        model: Model<B>,
        data: &TrainingData<B>,
        observer: &mut dyn EpochObserver,
    ) -> TrainingOutcome<B> {
        let config = &self.config;
        let mut model = model;
        // torch の RMSprop と同じ既定値
        let mut optim = RmsPropConfig::new()
            .with_alpha(0.99)
            .with_epsilon(1e-8)
            .init();

        let mut best = model.valid();
        let mut min_loss = f64::INFINITY;
        let mut best_epoch = None;
        let mut history = Vec::with_capacity(config.max_iterations);
        let mut observer = Some(observer);
        let mut observer_error = None;
        let mut stop = StopReason::Exhausted;
        let training_start = Instant::now();

        log::info!(
            "学習を開始します - 学習点数: {}, 最大エポック数: {}",
            data.coords.dims()[0],
            config.max_iterations
        );

        for epoch in 1..=config.max_iterations {
            if self.cancel.is_cancelled() {
                log::warn!("中断要求により {} エポックで学習を終了します", epoch - 1);
                stop = StopReason::Cancelled {
                    completed: epoch - 1,
                };
                break;
            }

            let terms = config
                .loss
                .forward(&model, data.coords.clone(), data.values.clone());
            let (data_loss, gradient_loss, total_loss) = terms.values();
            let record = EpochRecord {
                epoch,
                data_loss,
                gradient_loss,
                total_loss,
            };

            let finite = total_loss.is_finite();
            // 更新前のパラメータがこの損失に対応する
            let snapshot = (finite && total_loss < min_loss).then(|| model.valid());

            if finite {
                let grads = terms.total.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optim.step(config.optimizer_step, model, grads);
            }

            let periodic = epoch.checked_rem(config.report_interval) == Some(0);
            if epoch == 1 || periodic || !finite {
                log::info!(
                    "[Epoch {}] Training MSE: {:.6e}, Data MSE: {:.6e}, Grad MSE: {:.6e}",
                    epoch,
                    total_loss,
                    data_loss,
                    gradient_loss
                );
            } else {
                log::debug!(
                    "[Epoch {}] Training MSE: {:.6e}, Data MSE: {:.6e}, Grad MSE: {:.6e}",
                    epoch,
                    total_loss,
                    data_loss,
                    gradient_loss
                );
            }
            let failure = match observer.as_mut() {
                Some(sink) => sink.on_epoch(&record).err(),
                None => None,
            };
            if let Some(e) = failure {
                log::error!("エポック {epoch} の記録に失敗しました。以降の記録を停止します: {e}");
                observer_error = Some(e);
                observer = None;
            }
            history.push(record);

            if let Some(snapshot) = snapshot {
                best = snapshot;
                min_loss = total_loss;
                best_epoch = Some(epoch);
            }

            if !finite {
                log::error!("エポック {epoch} で損失が有限値ではなくなったため学習を打ち切ります");
                stop = StopReason::NonFiniteLoss { epoch };
                break;
            }
        }

        let training_duration = training_start.elapsed();
        log::info!("学習が完了しました ({:?})", stop);
        log::info!("=> 学習時間: {:.2?}", training_duration);
        match best_epoch {
            Some(epoch) => log::info!("=> 最良モデル: エポック {epoch}, Training MSE {min_loss:.6e}"),
            None => log::warn!("有限の損失が得られなかったため初期モデルを最良モデルとします"),
        }

        TrainingOutcome {
            best,
            min_loss,
            best_epoch,
            history,
            stop,
            observer_error,
        }
    }
}

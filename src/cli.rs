use crate::config::{AiSettings, RunConfig};
use crate::error::Error;
use crate::evaluation::Evaluator;
use crate::fields::CsvFieldWriter;
use crate::mesh::{CartesianMesh, FieldShape, Mesh};
use crate::model::Activation;
use crate::plot::plot_loss_history;
use crate::run_log::{RunHeader, RunLog, available_file_name};
use crate::training::{CancelToken, StopReason, Trainer};
use crate::view::FieldView;
use anyhow::{Context, bail};
use burn::backend::{Autodiff, NdArray};
use burn::prelude::Backend;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

type MyBackend = Autodiff<NdArray<f64>>;

/// clapでコマンドラインの構造を定義します。
#[derive(Parser, Debug)]
#[command(author, version, about = "Approximate a scalar field with a physics-informed neural network (Burn)", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    /// debug レベルのログを出力します (RUST_LOG が優先されます)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// 実行するサブコマンドを定義します（train または check）。
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// モデルを学習し、領域全体で評価した結果をファイルに保存します
    Train(TrainArgs),
    /// 設定とメッシュを検証し、学習せずに内容を表示します
    Check(TrainArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// 設定ファイル (TOML の [ai] テーブル)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// 隠れ層の幅 (例: 8,8)
    #[arg(long, value_delimiter = ',')]
    pub hidden_layers: Option<Vec<usize>>,
    /// オプティマイザの学習率
    #[arg(long)]
    pub optimizer_step: Option<f64>,
    /// 最大エポック数
    #[arg(long)]
    pub max_iterations: Option<usize>,
    /// 活性化関数
    #[arg(long, value_enum)]
    pub activation: Option<Activation>,
    /// データ損失の重み
    #[arg(long)]
    pub data_weight: Option<f64>,
    /// 勾配損失の重み
    #[arg(long)]
    pub gradient_weight: Option<f64>,
    /// 学習に使う点の割合
    #[arg(long)]
    pub training_fraction: Option<f64>,
    /// 乱数シード (省略時は毎回異なる抽出になります)
    #[arg(long)]
    pub seed: Option<u64>,
    /// 損失を表示する間隔 (エポック数)
    #[arg(long)]
    pub report_interval: Option<usize>,
    /// 各方向のセル数
    #[arg(long, value_delimiter = ',', default_values_t = [20, 20, 1])]
    pub cells: Vec<usize>,
    /// 近似するスカラー場
    #[arg(long, value_enum, default_value_t = FieldShape::Distance)]
    pub field: FieldShape,
    /// 出力ディレクトリ
    #[arg(long, default_value = "pinn-output")]
    pub output: PathBuf,
    /// 学習ログのファイル名の接頭辞
    #[arg(long, default_value = "pinnField")]
    pub log_base: String,
    /// 損失のグラフを PNG で保存します
    #[arg(long)]
    pub plot: bool,
}

impl TrainArgs {
    fn overrides(&self) -> AiSettings {
        AiSettings {
            hidden_layers: self.hidden_layers.clone(),
            optimizer_step: self.optimizer_step,
            max_iterations: self.max_iterations,
            activation: self.activation,
            data_weight: self.data_weight,
            gradient_weight: self.gradient_weight,
            gradient_target: None,
            training_fraction: self.training_fraction,
            seed: self.seed,
            report_interval: self.report_interval,
        }
    }

    /// 設定ファイルと引数を統合し、検証します。テンソルはまだ確保しません。
    pub fn resolve(&self) -> anyhow::Result<RunConfig> {
        let file = match &self.config {
            Some(path) => AiSettings::load(path)
                .with_context(|| format!("設定ファイル '{}' を読めません", path.display()))?,
            None => AiSettings::default(),
        };
        Ok(file.merge(self.overrides()).resolve()?)
    }

    pub fn mesh(&self) -> anyhow::Result<CartesianMesh> {
        let [nx, ny, nz] = self.cells.as_slice() else {
            bail!("--cells には3つの値を指定してください: {:?}", self.cells);
        };
        Ok(CartesianMesh::unit_cube([*nx, *ny, *nz])?)
    }
}

fn delta_x(mesh: &CartesianMesh) -> f64 {
    mesh.characteristic_length()
        .unwrap_or_else(|| mesh.spacing().into_iter().fold(0.0, f64::max))
}

/// `check`サブコマンドを実行します。
pub fn run_check(args: TrainArgs) -> anyhow::Result<()> {
    let config = args.resolve()?;
    let mesh = args.mesh()?;
    let sampler = config.sampler()?;
    log::info!("隠れ層: [{}]", config.hyper.hidden_layers_label());
    log::info!("活性化関数: {:?}", config.activation);
    log::info!(
        "学習率: {}, 最大エポック数: {}",
        config.hyper.optimizer_step,
        config.hyper.max_iterations
    );
    log::info!("損失: {:?}", config.loss);
    log::info!(
        "セル数: {} ({:?}), DELTA_X: {}",
        mesh.n_cells(),
        mesh.cells(),
        delta_x(&mesh)
    );
    let n_train = sampler.subset_len(mesh.n_cells());
    log::info!("学習点数: {n_train}");
    if n_train == 0 {
        return Err(Error::EmptyTrainingSet {
            points: mesh.n_cells(),
        }
        .into());
    }
    Ok(())
}

/// `train`サブコマンドを実行します。
///
/// 学習点の抽出、学習、最良モデルによる全セルの評価、結果の書き出しを行います。
pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let config = args.resolve()?;
    let mesh = args.mesh()?;
    let input = args.field.sample(&mesh, "vf");
    let mut output = mesh.zero_field("vf_nn");
    let delta_x = delta_x(&mesh);

    // --- データセットの準備 ---
    let n_cells = mesh.n_cells();
    let subset = config.sampler()?.sample(n_cells);
    log::info!(
        "{} セルから {} 点を学習に使います (seed = {})",
        n_cells,
        subset.len(),
        subset.seed
    );
    let device = Default::default();
    MyBackend::seed(subset.seed);
    let data = subset.gather::<MyBackend>(
        mesh.coordinates(),
        FieldView::new(&input.values, n_cells)?,
        &device,
    )?;

    // --- モデルと学習ログの初期化 ---
    let model = config.model_config().init::<MyBackend>(&device)?;
    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("出力ディレクトリ '{}' を作成できません", args.output.display()))?;
    let (mut run_log, log_path) = RunLog::create_in(
        &args.output,
        &args.log_base,
        RunHeader::new(&config.hyper, delta_x),
    )
    .context("学習ログを作成できません")?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::warn!("中断要求を受け付けました。現在のエポックの完了後に停止します");
        handler_token.cancel();
    }) {
        log::warn!("Ctrl-C ハンドラを設定できません: {e}");
    }

    // --- 学習 ---
    log::info!("学習を開始します - バックエンド: NdArray (CPU)");
    let trainer = Trainer::new(config.trainer_config()).with_cancel_token(cancel);
    let outcome = trainer.train(model, &data, &mut run_log);
    log::info!("=> 学習ログ: '{}' ({} 行)", log_path.display(), run_log.rows());

    // --- 評価と結果の保存 ---
    let evaluator = Evaluator::new(config.loss.gradient_target);
    let evaluation = evaluator.evaluate(&outcome.best, &mesh, &input, &mut output, &device)?;
    let mut writer = CsvFieldWriter::new(&args.output, mesh.cell_centres())?;
    evaluator.write_fields(&evaluation, &mut writer)?;
    log::info!("=> 結果の場を '{}' に保存しました", args.output.display());

    if args.plot {
        let path = available_file_name(&args.output.join("loss_graph").to_string_lossy(), ".png");
        match plot_loss_history(&outcome.history, &path) {
            Ok(()) => log::info!("=> 損失グラフを '{}' に保存しました", path.display()),
            Err(e) => log::warn!("{e}"),
        }
    }

    if let Some(e) = outcome.observer_error {
        return Err(e).context("学習ログの書き込みに失敗しました");
    }
    if let StopReason::NonFiniteLoss { epoch } = outcome.stop {
        bail!("エポック {epoch} で損失が有限値ではなくなりました");
    }
    Ok(())
}

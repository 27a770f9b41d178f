//! # 物理情報ニューラルネットワーク (PINN) によるスカラー場の近似
//!
//! `clap` クレートを利用して、コマンドラインから`train`（学習と評価）と`check`（設定の検証）を
//! 実行できます。
//!
//! ## 使い方
//!
//! ### 学習
//! ```bash
//! cargo run --release -- train --hidden-layers 8,8 --optimizer-step 0.01 --max-iterations 500
//! ```
//!
//! ### 設定ファイルから学習
//! ```bash
//! cargo run --release -- train --config pinn.toml --plot
//! ```

use clap::Parser;
use pinn_field::cli::{Cli, Commands, run_check, run_train};

/// プログラムのエントリーポイント。
///
/// コマンドライン引数を解析し、`train`または`check`の処理に振り分けます。
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Train(args) => run_train(args),
        Commands::Check(args) => run_check(args),
    }
}

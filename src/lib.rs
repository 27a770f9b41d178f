//! # 物理情報ニューラルネットワーク (PINN) によるスカラー場の近似
//!
//! `burn` フレームワークを使用して、メッシュのセル中心で与えられたスカラー場を
//! 多層パーセプトロンで近似します。損失はデータとの二乗誤差に、
//! 予測場の勾配の大きさが目標値 (|∇u| = 1) からずれる量を加えたものです。
//!
//! 処理の流れ:
//! 1. [`sampler`] が全セルから学習用の点を抽出する
//! 2. [`model`] が隠れ層の幅の列から MLP を構築する
//! 3. [`training`] が物理情報損失でモデルを学習し、最良モデルを保持する
//! 4. [`evaluation`] が最良モデルを全セルで評価し、誤差を計算する
//! 5. [`run_log`] がエポックごとの損失を CSV に記録する

pub mod cli;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod fields;
pub mod mesh;
pub mod model;
pub mod pinn;
pub mod plot;
pub mod run_log;
pub mod sampler;
pub mod training;
pub mod view;

pub use error::{Error, Result};

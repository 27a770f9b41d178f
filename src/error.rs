//! エラー型の定義
//!
//! 設定エラー・形状エラーは学習開始前に、I/Oエラーは呼び出し元に返します。

/// ライブラリ全体で使うエラー型
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// ハイパーパラメータや実行設定が不正
    #[error("不正な設定: {0}")]
    InvalidConfig(String),

    /// バッファ長と宣言された形状が一致しない
    #[error("{what} の形状が一致しません: 期待値 {expected}, 実際 {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// 学習用のサブセットが空
    #[error("学習データが空です (全点数 {points})")]
    EmptyTrainingSet { points: usize },

    /// ファイル I/O エラー
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// CSV の読み書きエラー
    #[error(transparent)]
    Csv(#[from] csv::Error),

    /// 設定ファイルの構文エラー
    #[error(transparent)]
    ConfigParse(#[from] toml::de::Error),

    /// テンソルから値を取り出せない
    #[error("テンソルデータの変換に失敗しました: {0}")]
    Tensor(String),

    /// 学習ログの行が読めない
    #[error("学習ログの形式が不正です: {0}")]
    LogFormat(String),

    /// グラフ描画の失敗
    #[error("グラフの描画に失敗しました: {0}")]
    Plot(String),
}

/// ライブラリの Result 型
pub type Result<T> = std::result::Result<T, Error>;

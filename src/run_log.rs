//! エポックごとの学習ログ (CSV)。
//!
//! 1行目にヘッダを書き、以降1エポックにつき1行を追記します。
//! ファイル名は `<base>-00000000.csv` の連番で、既存のログを上書きしません。

use crate::config::Hyperparameters;
use crate::error::{Error, Result};
use crate::training::{EpochObserver, EpochRecord};
use csv::StringRecord;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

pub const HEADER: &str =
    "HIDDEN_LAYERS,OPTIMIZER_STEP,MAX_ITERATIONS,DELTA_X,EPOCH,DATA_MSE,GRAD_MSE,TRAINING_MSE";

/// 連番付きファイル名 `<base>-NNNNNNNN<extension>`。
pub fn numbered_file_name(base: &str, index: u32, extension: &str) -> String {
    format!("{base}-{index:08}{extension}")
}

/// まだ存在しない最初の連番付きファイル名を返します。
pub fn available_file_name(base: &str, extension: &str) -> PathBuf {
    (0..)
        .map(|i| PathBuf::from(numbered_file_name(base, i, extension)))
        .find(|path| !path.exists())
        .unwrap_or_else(|| PathBuf::from(numbered_file_name(base, u32::MAX, extension)))
}

/// 連番付きファイルを新規作成します。作成の直前に他の実行に取られた場合は次の番号を試します。
pub fn create_available_file(base: &str, extension: &str) -> Result<(File, PathBuf)> {
    create_numbered_file(base, extension, 0..=u32::MAX)
}

fn create_numbered_file(
    base: &str,
    extension: &str,
    counter: RangeInclusive<u32>,
) -> Result<(File, PathBuf)> {
    for index in counter {
        let path = PathBuf::from(numbered_file_name(base, index, extension));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::Io(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("'{base}-*{extension}' の連番をすべて使い切りました"),
    )))
}

/// 全行に共通する実行条件。
#[derive(Debug, Clone, PartialEq)]
pub struct RunHeader {
    pub hidden_layers: Vec<usize>,
    pub optimizer_step: f64,
    pub max_iterations: usize,
    pub delta_x: f64,
}

impl RunHeader {
    pub fn new(hyper: &Hyperparameters, delta_x: f64) -> Self {
        Self {
            hidden_layers: hyper.hidden_layers.clone(),
            optimizer_step: hyper.optimizer_step,
            max_iterations: hyper.max_iterations,
            delta_x,
        }
    }
}

/// ログの1行。
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub header: RunHeader,
    pub record: EpochRecord,
}

impl LogRow {
    /// 隠れ層の幅はカンマ区切りの1列になり、複数あれば引用符で囲まれます。
    pub fn to_record(&self) -> StringRecord {
        let layers = self
            .header
            .hidden_layers
            .iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>()
            .join(",");
        StringRecord::from(vec![
            layers,
            self.header.optimizer_step.to_string(),
            self.header.max_iterations.to_string(),
            self.header.delta_x.to_string(),
            self.record.epoch.to_string(),
            self.record.data_loss.to_string(),
            self.record.gradient_loss.to_string(),
            self.record.total_loss.to_string(),
        ])
    }

    pub fn from_record(record: &StringRecord) -> Result<Self> {
        let fields: Vec<&str> = record.iter().collect();
        let [layers, step, max, delta_x, epoch, data, grad, total] = fields.as_slice() else {
            return Err(Error::LogFormat(format!(
                "列数が一致しません (期待値 8, 実際 {})",
                record.len()
            )));
        };
        let hidden_layers = layers
            .split(',')
            .map(|w| parse_field::<usize>("HIDDEN_LAYERS", w))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            header: RunHeader {
                hidden_layers,
                optimizer_step: parse_field("OPTIMIZER_STEP", step)?,
                max_iterations: parse_field("MAX_ITERATIONS", max)?,
                delta_x: parse_field("DELTA_X", delta_x)?,
            },
            record: EpochRecord {
                epoch: parse_field("EPOCH", epoch)?,
                data_loss: parse_field("DATA_MSE", data)?,
                gradient_loss: parse_field("GRAD_MSE", grad)?,
                total_loss: parse_field("TRAINING_MSE", total)?,
            },
        })
    }
}

fn parse_field<T: std::str::FromStr>(column: &str, text: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| Error::LogFormat(format!("{column} を解釈できません: '{text}'")))
}

/// ヘッダ付きの学習ログを読み戻します。
pub fn read_log<R: Read>(reader: R) -> Result<Vec<LogRow>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let header = reader.headers()?;
    if !header.iter().eq(HEADER.split(',')) {
        return Err(Error::LogFormat(format!(
            "ヘッダが一致しません: {:?}",
            header.iter().collect::<Vec<_>>()
        )));
    }
    reader
        .records()
        .map(|record| LogRow::from_record(&record?))
        .collect()
}

/// 学習ログの書き込み側。
#[derive(Debug)]
pub struct RunLog<W: Write> {
    writer: csv::Writer<W>,
    header: RunHeader,
    rows: usize,
}

impl RunLog<BufWriter<File>> {
    /// `<base>-NNNNNNNN.csv` を新規作成します。
    pub fn create(base: &str, header: RunHeader) -> Result<(Self, PathBuf)> {
        let (file, path) = create_available_file(base, ".csv")?;
        log::info!("学習ログを '{}' に書き込みます", path.display());
        Ok((Self::new(BufWriter::new(file), header)?, path))
    }

    pub fn create_in(dir: &Path, base: &str, header: RunHeader) -> Result<(Self, PathBuf)> {
        let base = dir.join(base);
        Self::create(&base.to_string_lossy(), header)
    }
}

impl<W: Write> RunLog<W> {
    /// ヘッダ行を書いてログを開始します。
    pub fn new(writer: W, header: RunHeader) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(HEADER.split(','))?;
        writer.flush()?;
        Ok(Self {
            writer,
            header,
            rows: 0,
        })
    }

    pub fn append(&mut self, record: &EpochRecord) -> Result<()> {
        let row = LogRow {
            header: self.header.clone(),
            record: *record,
        };
        self.writer.write_record(&row.to_record())?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))
    }
}

impl<W: Write> EpochObserver for RunLog<W> {
    fn on_epoch(&mut self, record: &EpochRecord) -> Result<()> {
        self.append(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> RunHeader {
        RunHeader {
            hidden_layers: vec![8, 16, 8],
            optimizer_step: 0.001,
            max_iterations: 5000,
            delta_x: 0.0125,
        }
    }

    fn written(rows: &[EpochRecord], header: RunHeader) -> String {
        let mut log = RunLog::new(Vec::new(), header).unwrap();
        for record in rows {
            log.append(record).unwrap();
        }
        String::from_utf8(log.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn row_round_trips() {
        let record = EpochRecord {
            epoch: 42,
            data_loss: 1.234_567_890_123e-5,
            gradient_loss: 0.3,
            total_loss: 0.300_012_345_678_901_23,
        };
        let text = written(&[record], header());
        let line = text.lines().nth(1).unwrap();
        assert!(line.starts_with("\"8,16,8\",0.001,5000,0.0125,42,"));

        let rows = read_log(text.as_bytes()).unwrap();
        assert_eq!(
            rows,
            vec![LogRow {
                header: header(),
                record
            }]
        );
    }

    #[test]
    fn single_width_round_trips() {
        let row = LogRow {
            header: RunHeader {
                hidden_layers: vec![32],
                ..header()
            },
            record: EpochRecord {
                epoch: 1,
                data_loss: 0.0,
                gradient_loss: 1.0,
                total_loss: 1.0,
            },
        };
        assert_eq!(LogRow::from_record(&row.to_record()).unwrap(), row);
    }

    #[test]
    fn malformed_logs_are_rejected() {
        let body = |row: &str| format!("{HEADER}\n{row}\n");
        assert!(read_log(body("\"8,x\",0.1,1,0.1,1,0,0,0").as_bytes()).is_err());
        assert!(read_log(body("8,0.1,1,0.1,1,0,0").as_bytes()).is_err());
        assert!(read_log("EPOCH,DATA_MSE\n1,0\n".as_bytes()).is_err());
        let short = StringRecord::from(vec!["8", "0.1", "1"]);
        assert!(matches!(
            LogRow::from_record(&short),
            Err(Error::LogFormat(_))
        ));
    }

    #[test]
    fn log_writes_header_then_rows() {
        let mut log = RunLog::new(Vec::new(), header()).unwrap();
        for epoch in 1..=3 {
            log.on_epoch(&EpochRecord {
                epoch,
                data_loss: 0.5,
                gradient_loss: 0.25,
                total_loss: 0.75,
            })
            .unwrap();
        }
        assert_eq!(log.rows(), 3);
        let text = String::from_utf8(log.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], HEADER);
        let rows = read_log(text.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].record.epoch, 3);
        assert_eq!(rows[2].header, header());
    }

    #[test]
    fn file_names_are_zero_padded_and_never_reused() {
        assert_eq!(numbered_file_name("pinn", 7, ".csv"), "pinn-00000007.csv");

        let dir = tempfile::tempdir().unwrap();
        let (first_log, first) = RunLog::create_in(dir.path(), "pinn", header()).unwrap();
        let (second_log, second) = RunLog::create_in(dir.path(), "pinn", header()).unwrap();
        drop((first_log, second_log));
        assert_eq!(first.file_name().unwrap(), "pinn-00000000.csv");
        assert_eq!(second.file_name().unwrap(), "pinn-00000001.csv");
        let text = std::fs::read_to_string(&first).unwrap();
        assert_eq!(text, format!("{HEADER}\n"));
    }

    #[test]
    fn exhausted_counter_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("pinn");
        let base = base.to_string_lossy();
        create_numbered_file(&base, ".csv", 0..=1).unwrap();
        create_numbered_file(&base, ".csv", 0..=1).unwrap();
        let err = create_numbered_file(&base, ".csv", 0..=1).unwrap_err();
        assert!(matches!(err, Error::Io(e) if e.kind() == io::ErrorKind::AlreadyExists));
    }
}

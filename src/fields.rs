//! 評価結果の場をファイルに書き出します。

use crate::error::Result;
use crate::view::SPATIAL_DIM;
use std::fs;
use std::path::{Path, PathBuf};

/// 場の書き出し先。
pub trait FieldWriter {
    fn write_scalar(&mut self, name: &str, values: &[f64]) -> Result<()>;
    fn write_vector(&mut self, name: &str, values: &[[f64; SPATIAL_DIM]]) -> Result<()>;
}

/// セル中心の座標と値を `<dir>/<name>.csv` に書き出します。
#[derive(Debug)]
pub struct CsvFieldWriter<'a> {
    dir: PathBuf,
    centres: &'a [[f64; SPATIAL_DIM]],
    written: Vec<PathBuf>,
}

impl<'a> CsvFieldWriter<'a> {
    pub fn new(dir: impl AsRef<Path>, centres: &'a [[f64; SPATIAL_DIM]]) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            centres,
            written: Vec::new(),
        })
    }

    /// これまでに書き出したファイル。
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn write_rows(
        &mut self,
        name: &str,
        columns: &[String],
        rows: impl Iterator<Item = Vec<f64>>,
    ) -> Result<()> {
        let path = self.dir.join(format!("{name}.csv"));
        let mut out = csv::Writer::from_path(&path)?;
        out.write_record(["x", "y", "z"].into_iter().chain(columns.iter().map(String::as_str)))?;
        for (centre, row) in self.centres.iter().zip(rows) {
            out.write_record(centre.iter().chain(&row).map(|v| v.to_string()))?;
        }
        out.flush()?;
        log::debug!("場 '{}' を {} に書き出しました", name, path.display());
        self.written.push(path);
        Ok(())
    }
}

impl FieldWriter for CsvFieldWriter<'_> {
    fn write_scalar(&mut self, name: &str, values: &[f64]) -> Result<()> {
        self.write_rows(name, &[name.to_string()], values.iter().map(|&v| vec![v]))
    }

    fn write_vector(&mut self, name: &str, values: &[[f64; SPATIAL_DIM]]) -> Result<()> {
        let columns = ["x", "y", "z"].map(|axis| format!("{name}_{axis}"));
        self.write_rows(name, &columns, values.iter().map(|v| v.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_and_vector_fields_are_written_per_cell() {
        let dir = tempfile::tempdir().unwrap();
        let centres = [[0.0, 0.0, 0.0], [1.0, 0.5, 0.25]];
        let mut writer = CsvFieldWriter::new(dir.path().join("out"), &centres).unwrap();
        writer.write_scalar("vf_nn", &[1.5, -2.0]).unwrap();
        writer
            .write_vector("vf_grad", &[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]])
            .unwrap();
        assert_eq!(writer.written().len(), 2);

        let scalar = fs::read_to_string(dir.path().join("out/vf_nn.csv")).unwrap();
        assert_eq!(scalar, "x,y,z,vf_nn\n0,0,0,1.5\n1,0.5,0.25,-2\n");
        let vector = fs::read_to_string(dir.path().join("out/vf_grad.csv")).unwrap();
        assert_eq!(
            vector.lines().next(),
            Some("x,y,z,vf_grad_x,vf_grad_y,vf_grad_z")
        );
        assert_eq!(vector.lines().nth(2), Some("1,0.5,0.25,4,5,6"));
    }
}

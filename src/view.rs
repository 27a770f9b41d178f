//! 外部所有のバッファをコピーせずに参照するビュー。
//!
//! メッシュ側が持つセル中心座標とスカラー場の値を借用し、
//! burn のテンソルへ変換する境界だけでデータを複製します。

use crate::error::{Error, Result};
use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};

/// 空間座標の次元数
pub const SPATIAL_DIM: usize = 3;

/// `N×3` の座標バッファに対する読み取り専用ビュー。
#[derive(Debug, Clone, Copy)]
pub struct CoordinateView<'a> {
    data: &'a [f64],
    n_points: usize,
}

impl<'a> CoordinateView<'a> {
    /// 平坦なバッファから `n_points × 3` のビューを作ります。
    ///
    /// バッファ長が `n_points * 3` と異なる場合は `Error::ShapeMismatch` を返します。
    pub fn new(data: &'a [f64], n_points: usize) -> Result<Self> {
        let expected = n_points * SPATIAL_DIM;
        if data.len() != expected {
            return Err(Error::ShapeMismatch {
                what: "座標バッファ",
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, n_points })
    }

    /// 点の配列をそのまま平坦なバッファとして解釈します。
    pub fn from_points(points: &'a [[f64; SPATIAL_DIM]]) -> Self {
        Self {
            data: points.as_flattened(),
            n_points: points.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.n_points
    }

    pub fn is_empty(&self) -> bool {
        self.n_points == 0
    }

    /// `index` 番目の点の座標。
    pub fn point(&self, index: usize) -> [f64; SPATIAL_DIM] {
        let row = &self.data[index * SPATIAL_DIM..(index + 1) * SPATIAL_DIM];
        [row[0], row[1], row[2]]
    }

    pub fn as_slice(&self) -> &'a [f64] {
        self.data
    }

    /// `[N, 3]` のテンソルに変換します。
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let data = TensorData::new(self.data.to_vec(), [self.n_points, SPATIAL_DIM]);
        Tensor::from_data(data, device)
    }
}

/// 長さ `N` のスカラー場に対する読み取り専用ビュー。
#[derive(Debug, Clone, Copy)]
pub struct FieldView<'a> {
    data: &'a [f64],
}

impl<'a> FieldView<'a> {
    pub fn new(data: &'a [f64], n_points: usize) -> Result<Self> {
        if data.len() != n_points {
            return Err(Error::ShapeMismatch {
                what: "スカラー場バッファ",
                expected: n_points,
                actual: data.len(),
            });
        }
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &'a [f64] {
        self.data
    }

    /// `[N, 1]` のテンソルに変換します。
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let data = TensorData::new(self.data.to_vec(), [self.data.len(), 1]);
        Tensor::from_data(data, device)
    }
}

/// 出力スカラー場への書き込みビュー。
///
/// 評価結果は所有バッファとして計算し、ここで呼び出し元の記憶領域へ書き戻します。
#[derive(Debug)]
pub struct FieldViewMut<'a> {
    data: &'a mut [f64],
}

impl<'a> FieldViewMut<'a> {
    pub fn new(data: &'a mut [f64], n_points: usize) -> Result<Self> {
        if data.len() != n_points {
            return Err(Error::ShapeMismatch {
                what: "出力スカラー場バッファ",
                expected: n_points,
                actual: data.len(),
            });
        }
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 同じ長さの値列を書き込みます。
    pub fn write_from(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.data.len() {
            return Err(Error::ShapeMismatch {
                what: "予測値",
                expected: self.data.len(),
                actual: values.len(),
            });
        }
        self.data.copy_from_slice(values);
        Ok(())
    }
}

//! 空間離散化 (メッシュ) とセル中心のスカラー場。
//!
//! 学習の中核はこのモジュールの `Mesh` トレイトを通してのみ領域に触れます。
//! `CartesianMesh` は直方体を等間隔に分割したメッシュで、
//! 勾配はガウスの定理と線形補間 (面の値の差分) で計算します。

use crate::error::{Error, Result};
use crate::view::{CoordinateView, SPATIAL_DIM};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// 境界面の値の扱い。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    /// 境界面の値を隣接セルの値で更新する
    ZeroGradient,
    /// 境界面の値を固定する
    Fixed,
}

/// セル中心の値と境界面の値を持つスカラー場。
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    pub name: String,
    pub values: Vec<f64>,
    pub boundary: Vec<f64>,
    pub boundary_kind: BoundaryKind,
}

impl ScalarField {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// 学習と評価が必要とするメッシュの機能。
pub trait Mesh {
    fn n_cells(&self) -> usize;

    /// セル中心の座標 (セル番号順)。
    fn cell_centres(&self) -> &[[f64; SPATIAL_DIM]];

    /// 内部面の距離係数 `1/Δ` の最小値。内部面がなければ `None`。
    fn min_delta_coeff(&self) -> Option<f64>;

    /// 境界条件を評価し、境界面の値を更新します。
    fn correct_boundary_conditions(&self, field: &mut ScalarField);

    /// セルごとの勾配。場のセル数や境界面数がメッシュと合わなければ失敗します。
    fn gradient(&self, field: &ScalarField) -> Result<Vec<[f64; SPATIAL_DIM]>>;

    fn coordinates(&self) -> CoordinateView<'_> {
        CoordinateView::from_points(self.cell_centres())
    }

    /// 代表長さ `Δx = 1 / min(deltaCoeffs)`。
    fn characteristic_length(&self) -> Option<f64> {
        self.min_delta_coeff().map(|coeff| coeff.recip())
    }
}

/// 直方体領域を `nx × ny × nz` の等間隔セルに分割したメッシュ。
///
/// セル番号は x が最も速く変化します。`nz = 1` とすれば擬似2次元になります。
#[derive(Debug, Clone)]
pub struct CartesianMesh {
    cells: [usize; SPATIAL_DIM],
    origin: [f64; SPATIAL_DIM],
    spacing: [f64; SPATIAL_DIM],
    centres: Vec<[f64; SPATIAL_DIM]>,
}

impl CartesianMesh {
    pub fn new(
        cells: [usize; SPATIAL_DIM],
        origin: [f64; SPATIAL_DIM],
        extent: [f64; SPATIAL_DIM],
    ) -> Result<Self> {
        if cells.contains(&0) {
            return Err(Error::InvalidConfig(format!(
                "各方向のセル数は1以上で指定してください: {cells:?}"
            )));
        }
        if extent.iter().any(|&e| !(e.is_finite() && e > 0.0)) {
            return Err(Error::InvalidConfig(format!(
                "領域の大きさは正の値で指定してください: {extent:?}"
            )));
        }
        let spacing = [0, 1, 2].map(|a| extent[a] / cells[a] as f64);
        let mut centres = Vec::with_capacity(cells.iter().product());
        for k in 0..cells[2] {
            for j in 0..cells[1] {
                for i in 0..cells[0] {
                    let index = [i, j, k];
                    centres.push([0, 1, 2].map(|a| origin[a] + (index[a] as f64 + 0.5) * spacing[a]));
                }
            }
        }
        Ok(Self {
            cells,
            origin,
            spacing,
            centres,
        })
    }

    /// `[0, 1]^3` の単位立方体。
    pub fn unit_cube(cells: [usize; SPATIAL_DIM]) -> Result<Self> {
        Self::new(cells, [0.0; SPATIAL_DIM], [1.0; SPATIAL_DIM])
    }

    pub fn cells(&self) -> [usize; SPATIAL_DIM] {
        self.cells
    }

    pub fn spacing(&self) -> [f64; SPATIAL_DIM] {
        self.spacing
    }

    /// 領域の中心。
    pub fn centre(&self) -> [f64; SPATIAL_DIM] {
        [0, 1, 2].map(|a| self.origin[a] + 0.5 * self.cells[a] as f64 * self.spacing[a])
    }

    fn cell_index(&self, index: [usize; SPATIAL_DIM]) -> usize {
        index[0] + self.cells[0] * (index[1] + self.cells[1] * index[2])
    }

    /// `axis` に垂直な境界パッチ1枚分の面数。
    fn patch_len(&self, axis: usize) -> usize {
        let (a1, a2) = other_axes(axis);
        self.cells[a1] * self.cells[a2]
    }

    pub fn n_boundary_faces(&self) -> usize {
        (0..SPATIAL_DIM).map(|axis| 2 * self.patch_len(axis)).sum()
    }

    /// 境界面の番号。パッチは (x-, x+, y-, y+, z-, z+) の順です。
    fn boundary_face(&self, axis: usize, upper: bool, index: [usize; SPATIAL_DIM]) -> usize {
        let offset: usize = (0..axis).map(|a| 2 * self.patch_len(a)).sum::<usize>()
            + if upper { self.patch_len(axis) } else { 0 };
        let (a1, a2) = other_axes(axis);
        offset + index[a1] + self.cells[a1] * index[a2]
    }

    fn boundary_face_centre(&self, axis: usize, upper: bool, index: [usize; SPATIAL_DIM]) -> [f64; 3] {
        let mut centre = self.centres[self.cell_index(index)];
        let side = if upper { 1.0 } else { -1.0 };
        centre[axis] += side * 0.5 * self.spacing[axis];
        centre
    }

    /// 境界に接するセルを `(軸, 上側か, セルの添字)` として列挙します。
    fn boundary_cells(&self) -> Vec<(usize, bool, [usize; SPATIAL_DIM])> {
        let mut faces = Vec::with_capacity(self.n_boundary_faces());
        for axis in 0..SPATIAL_DIM {
            let (a1, a2) = other_axes(axis);
            for upper in [false, true] {
                for i2 in 0..self.cells[a2] {
                    for i1 in 0..self.cells[a1] {
                        let mut index = [0; SPATIAL_DIM];
                        index[axis] = if upper { self.cells[axis] - 1 } else { 0 };
                        index[a1] = i1;
                        index[a2] = i2;
                        faces.push((axis, upper, index));
                    }
                }
            }
        }
        faces
    }

    /// 境界面の値が0で、隣接セルの値を引き継ぐ場を作ります。
    pub fn zero_field(&self, name: &str) -> ScalarField {
        ScalarField {
            name: name.to_string(),
            values: vec![0.0; self.n_cells()],
            boundary: vec![0.0; self.n_boundary_faces()],
            boundary_kind: BoundaryKind::ZeroGradient,
        }
    }

    /// 解析関数をセル中心と境界面の中心で評価した場を作ります。境界値は固定です。
    pub fn sample(&self, name: &str, f: impl Fn([f64; SPATIAL_DIM]) -> f64) -> ScalarField {
        let values = self.centres.iter().map(|&p| f(p)).collect();
        let mut boundary = vec![0.0; self.n_boundary_faces()];
        for (axis, upper, index) in self.boundary_cells() {
            boundary[self.boundary_face(axis, upper, index)] =
                f(self.boundary_face_centre(axis, upper, index));
        }
        ScalarField {
            name: name.to_string(),
            values,
            boundary,
            boundary_kind: BoundaryKind::Fixed,
        }
    }
}

fn other_axes(axis: usize) -> (usize, usize) {
    match axis {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    }
}

impl Mesh for CartesianMesh {
    fn n_cells(&self) -> usize {
        self.centres.len()
    }

    fn cell_centres(&self) -> &[[f64; SPATIAL_DIM]] {
        &self.centres
    }

    fn min_delta_coeff(&self) -> Option<f64> {
        (0..SPATIAL_DIM)
            .filter(|&a| self.cells[a] > 1)
            .map(|a| self.spacing[a].recip())
            .reduce(f64::min)
    }

    fn correct_boundary_conditions(&self, field: &mut ScalarField) {
        if field.boundary.len() != self.n_boundary_faces() {
            field.boundary = vec![0.0; self.n_boundary_faces()];
        }
        if field.boundary_kind == BoundaryKind::Fixed {
            return;
        }
        for (axis, upper, index) in self.boundary_cells() {
            field.boundary[self.boundary_face(axis, upper, index)] =
                field.values[self.cell_index(index)];
        }
    }

    fn gradient(&self, field: &ScalarField) -> Result<Vec<[f64; SPATIAL_DIM]>> {
        if field.values.len() != self.n_cells() {
            return Err(Error::ShapeMismatch {
                what: "場のセル数",
                expected: self.n_cells(),
                actual: field.values.len(),
            });
        }
        if field.boundary.len() != self.n_boundary_faces() {
            return Err(Error::ShapeMismatch {
                what: "場の境界面数",
                expected: self.n_boundary_faces(),
                actual: field.boundary.len(),
            });
        }
        let mut gradient = Vec::with_capacity(self.n_cells());
        for k in 0..self.cells[2] {
            for j in 0..self.cells[1] {
                for i in 0..self.cells[0] {
                    let index = [i, j, k];
                    let own = field.values[self.cell_index(index)];
                    let face_value = |axis: usize, upper: bool| {
                        let at_boundary = if upper {
                            index[axis] + 1 == self.cells[axis]
                        } else {
                            index[axis] == 0
                        };
                        if at_boundary {
                            field.boundary[self.boundary_face(axis, upper, index)]
                        } else {
                            let mut neighbour = index;
                            if upper {
                                neighbour[axis] += 1;
                            } else {
                                neighbour[axis] -= 1;
                            }
                            0.5 * (own + field.values[self.cell_index(neighbour)])
                        }
                    };
                    gradient.push(
                        [0, 1, 2].map(|a| (face_value(a, true) - face_value(a, false)) / self.spacing[a]),
                    );
                }
            }
        }
        Ok(gradient)
    }
}

/// 学習対象として用意された解析的なスカラー場。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FieldShape {
    /// 領域中心からの距離 (|∇u| = 1)
    #[default]
    Distance,
    /// 定数 (|∇u| = 0)
    Constant,
    /// (x + y + z)/√3 (|∇u| = 1)
    Linear,
    /// sin(πx) sin(πy)
    Sine,
}

impl FieldShape {
    pub fn evaluate(self, point: [f64; SPATIAL_DIM], centre: [f64; SPATIAL_DIM]) -> f64 {
        match self {
            FieldShape::Distance => (0..SPATIAL_DIM)
                .map(|a| (point[a] - centre[a]).powi(2))
                .sum::<f64>()
                .sqrt(),
            FieldShape::Constant => 1.0,
            FieldShape::Linear => point.iter().sum::<f64>() / 3f64.sqrt(),
            FieldShape::Sine => (PI * point[0]).sin() * (PI * point[1]).sin(),
        }
    }

    /// メッシュ上に場を作ります。
    pub fn sample(self, mesh: &CartesianMesh, name: &str) -> ScalarField {
        let centre = mesh.centre();
        mesh.sample(name, |p| self.evaluate(p, centre))
    }
}

use crate::error::{Error, Result};
use crate::fields::FieldWriter;
use crate::mesh::{Mesh, ScalarField};
use crate::model::Model;
use crate::pinn::{GRADIENT_TARGET, gradient_norm};
use crate::view::{FieldView, FieldViewMut, SPATIAL_DIM};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use std::time::Instant;

/// 領域全体での評価結果。
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub predicted: Vec<f64>,
    /// |真値 - 予測値|
    pub abs_error: Vec<f64>,
    pub max_abs_error: f64,
    pub mean_abs_error: f64,
    pub true_gradient: Vec<[f64; SPATIAL_DIM]>,
    pub predicted_gradient: Vec<[f64; SPATIAL_DIM]>,
    /// |∇真値 - ∇予測値|
    pub gradient_error: Vec<f64>,
    /// ネットワーク自身の勾配について mean(| |∇u| - 目標値 |)
    pub network_gradient_residual: f64,
}

/// 最良モデルを全セルで評価します。学習状態は読みません。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluator {
    gradient_target: f64,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(GRADIENT_TARGET)
    }
}

fn tensor_values<B: Backend>(tensor: Tensor<B, 2>) -> Result<Vec<f64>> {
    tensor
        .into_data()
        .convert::<f64>()
        .to_vec::<f64>()
        .map_err(|e| Error::Tensor(format!("{e:?}")))
}

impl Evaluator {
    pub fn new(gradient_target: f64) -> Self {
        Self { gradient_target }
    }

    /// 予測値を `output` に書き込み、境界条件を更新してから誤差を計算します。
    pub fn evaluate<B: Backend, M: Mesh>(
        &self,
        model: &Model<B>,
        mesh: &M,
        input: &ScalarField,
        output: &mut ScalarField,
        device: &B::Device,
    ) -> Result<Evaluation> {
        let n_cells = mesh.n_cells();
        if n_cells == 0 {
            return Err(Error::InvalidConfig("メッシュにセルがありません".to_string()));
        }
        let truth = FieldView::new(&input.values, n_cells)?;
        let true_gradient = mesh.gradient(input)?;
        let coords = mesh.coordinates();
        let evaluation_start = Instant::now();

        let (values, network_gradient) =
            model.forward_with_input_gradient(coords.to_tensor::<B>(device));
        let norms = tensor_values(gradient_norm(network_gradient))?;
        let predicted = tensor_values(values)?;

        FieldViewMut::new(&mut output.values, n_cells)?.write_from(&predicted)?;
        mesh.correct_boundary_conditions(output);

        let abs_error: Vec<f64> = truth
            .as_slice()
            .iter()
            .zip(&predicted)
            .map(|(t, p)| (t - p).abs())
            .collect();
        // NaN は最大値として残す
        let max_abs_error = abs_error
            .iter()
            .copied()
            .fold(0.0_f64, |max, e| if max.is_nan() || max >= e { max } else { e });
        let mean_abs_error = abs_error.iter().sum::<f64>() / n_cells as f64;
        if !max_abs_error.is_finite() {
            log::warn!("予測値または真値に有限でない値が含まれます");
        }

        let predicted_gradient = mesh.gradient(output)?;
        let gradient_error = true_gradient
            .iter()
            .zip(&predicted_gradient)
            .map(|(t, p)| {
                (0..SPATIAL_DIM)
                    .map(|a| (t[a] - p[a]).powi(2))
                    .sum::<f64>()
                    .sqrt()
            })
            .collect();
        let network_gradient_residual = norms
            .iter()
            .map(|n| (n - self.gradient_target).abs())
            .sum::<f64>()
            / n_cells as f64;

        log::info!(
            "評価が完了しました。セル数: {}, 評価時間: {:.2?}",
            n_cells,
            evaluation_start.elapsed()
        );
        log::info!("max(|field - field_nn|) = {max_abs_error}");
        log::info!("mean(|field - field_nn|) = {mean_abs_error}");
        log::info!("mean(||grad(field_nn)| - {}|) = {network_gradient_residual}", self.gradient_target);

        Ok(Evaluation {
            predicted,
            abs_error,
            max_abs_error,
            mean_abs_error,
            true_gradient,
            predicted_gradient,
            gradient_error,
            network_gradient_residual,
        })
    }

    /// 評価結果の場を書き出します。
    pub fn write_fields(
        &self,
        evaluation: &Evaluation,
        writer: &mut dyn FieldWriter,
    ) -> Result<()> {
        writer.write_scalar("error_c", &evaluation.abs_error)?;
        writer.write_scalar("vf_nn", &evaluation.predicted)?;
        writer.write_vector("vf_nn_grad", &evaluation.predicted_gradient)?;
        writer.write_vector("vf_grad", &evaluation.true_gradient)?;
        writer.write_scalar("error_grad_c", &evaluation.gradient_error)?;
        Ok(())
    }
}

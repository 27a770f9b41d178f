use crate::model::Model;
use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::Backend;
use burn::tensor::{ElementConversion, Tensor};
use serde::{Deserialize, Serialize};

/// 勾配の大きさの目標値 (アイコナール方程式 |∇u| = 1)
pub const GRADIENT_TARGET: f64 = 1.0;

/// データ損失と勾配損失の重み。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    pub data: f64,
    pub gradient: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            data: 1.0,
            gradient: 1.0,
        }
    }
}

/// 1エポック分の損失テンソル。
#[derive(Debug, Clone)]
pub struct LossTerms<B: Backend> {
    pub data: Tensor<B, 1>,
    pub gradient: Tensor<B, 1>,
    pub total: Tensor<B, 1>,
}

impl<B: Backend> LossTerms<B> {
    /// `(data, gradient, total)` をスカラー値として取り出します。
    pub fn values(&self) -> (f64, f64, f64) {
        (
            scalar(self.data.clone()),
            scalar(self.gradient.clone()),
            scalar(self.total.clone()),
        )
    }
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}

/// データ誤差と勾配の大きさの残差を組み合わせた物理情報損失。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsLoss {
    pub weights: LossWeights,
    pub gradient_target: f64,
}

impl Default for PhysicsLoss {
    fn default() -> Self {
        Self {
            weights: LossWeights::default(),
            gradient_target: GRADIENT_TARGET,
        }
    }
}

impl PhysicsLoss {
    /// 損失を計算します。
    ///
    /// データ損失は予測値と真値の二乗平均誤差、勾配損失は予測場の勾配のユークリッドノルムと
    /// 目標値との二乗平均誤差です。合計は両者の重み付き和です。
    pub fn forward<B: Backend>(
        &self,
        model: &Model<B>,
        coords: Tensor<B, 2>,
        values: Tensor<B, 2>,
    ) -> LossTerms<B> {
        let (predicted, gradient) = model.forward_with_input_gradient(coords);
        let data = MseLoss::new().forward(predicted, values.clone(), Reduction::Mean);
        let gradient_norm = gradient_norm(gradient);
        let target = Tensor::ones_like(&values).mul_scalar(self.gradient_target);
        let gradient = MseLoss::new().forward(gradient_norm, target, Reduction::Mean);
        let total = data.clone().mul_scalar(self.weights.data)
            + gradient.clone().mul_scalar(self.weights.gradient);
        LossTerms {
            data,
            gradient,
            total,
        }
    }
}

/// `[N, 3]` の勾配から `[N, 1]` のユークリッドノルムを計算します。
///
/// 勾配が零ベクトルの行ではノルムを0とし、その行からの逆伝播も0にします
/// (`sqrt` の導関数は0で発散するため)。
pub fn gradient_norm<B: Backend>(gradient: Tensor<B, 2>) -> Tensor<B, 2> {
    let squared = gradient.powf_scalar(2.0).sum_dim(1);
    let zero = squared.clone().equal_elem(0.0);
    squared
        .mask_fill(zero.clone(), 1.0)
        .sqrt()
        .mask_fill(zero, 0.0)
}

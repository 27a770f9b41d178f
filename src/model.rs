use crate::error::{Error, Result};
use crate::view::SPATIAL_DIM;
use burn::module::{Ignored, Module};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::Backend;
use burn::tensor::activation;
use burn::tensor::{Tensor, TensorData};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, SQRT_2};

/// 出力は1次元のスカラー場
pub const OUTPUT_DIM: usize = 1;

/// 隠れ層の間に挟む活性化関数。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Gelu,
    Tanh,
    Sigmoid,
    Relu,
}

impl Activation {
    pub fn forward<B: Backend, const D: usize>(self, z: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Gelu => activation::gelu(z),
            Activation::Tanh => z.tanh(),
            Activation::Sigmoid => activation::sigmoid(z),
            Activation::Relu => activation::relu(z),
        }
    }

    /// 活性化関数の導関数 σ'(z)。
    pub fn derivative<B: Backend, const D: usize>(self, z: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Gelu => {
                // Φ(z) + z φ(z)
                let cdf = z
                    .clone()
                    .div_scalar(SQRT_2)
                    .erf()
                    .add_scalar(1.0)
                    .mul_scalar(0.5);
                let pdf = z
                    .clone()
                    .powf_scalar(2.0)
                    .mul_scalar(-0.5)
                    .exp()
                    .mul_scalar(1.0 / (2.0 * PI).sqrt());
                cdf + z.mul(pdf)
            }
            Activation::Tanh => {
                let t = z.tanh();
                t.clone().mul(t).neg().add_scalar(1.0)
            }
            Activation::Sigmoid => {
                let s = activation::sigmoid(z);
                s.clone().mul(s.neg().add_scalar(1.0))
            }
            Activation::Relu => z.greater_elem(0.0).float(),
        }
    }
}

/// 多層パーセプトロンの構成。
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub hidden_layers: Vec<usize>,
    pub activation: Activation,
}

impl ModelConfig {
    pub fn new(hidden_layers: Vec<usize>) -> Self {
        Self {
            hidden_layers,
            activation: Activation::default(),
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// 隠れ層の幅が1つ以上あり、すべて正であることを確認します。
    pub fn validate(&self) -> Result<()> {
        if self.hidden_layers.is_empty() {
            return Err(Error::InvalidConfig(
                "隠れ層の幅を1つ以上指定してください".to_string(),
            ));
        }
        if let Some(pos) = self.hidden_layers.iter().position(|&w| w == 0) {
            return Err(Error::InvalidConfig(format!(
                "隠れ層 {pos} の幅が0です: {:?}",
                self.hidden_layers
            )));
        }
        Ok(())
    }

    /// 新しいモデルを初期化します。
    ///
    /// `[h0, h1, ..., hk]` から `Linear(3,h0) -> σ -> ... -> Linear(hk,1)` を構築します。
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Model<B>> {
        self.validate()?;
        let mut linears = Vec::with_capacity(self.hidden_layers.len() + 1);
        let mut d_input = SPATIAL_DIM;
        for &width in &self.hidden_layers {
            linears.push(LinearConfig::new(d_input, width).init(device));
            d_input = width;
        }
        linears.push(LinearConfig::new(d_input, OUTPUT_DIM).init(device));
        Ok(Model {
            linears,
            activation: Ignored(self.activation),
        })
    }
}

/// スカラー場を近似するニューラルネットワークモデル。
///
/// セル中心の座標(x, y, z)を入力とし、その点におけるスカラー値を予測する多層パーセプトロン（MLP）です。
#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    linears: Vec<Linear<B>>,
    activation: Ignored<Activation>,
}

impl<B: Backend> Model<B> {
    fn layers(&self) -> (&Linear<B>, &[Linear<B>]) {
        self.linears
            .split_last()
            .expect("ModelConfig::init は出力層を必ず作ります")
    }

    pub fn activation(&self) -> Activation {
        *self.activation
    }

    /// 各アフィン層の `(入力次元, 出力次元)`。
    pub fn layer_dims(&self) -> Vec<(usize, usize)> {
        self.linears
            .iter()
            .map(|linear| {
                let [d_input, d_output] = linear.weight.val().dims();
                (d_input, d_output)
            })
            .collect()
    }

    /// `index` 番目のアフィン層の重み `[d_input, d_output]`。
    pub fn layer_weight(&self, index: usize) -> Tensor<B, 2> {
        self.linears[index].weight.val()
    }

    /// 各層のバイアスの長さ。
    pub fn bias_dims(&self) -> Vec<Option<usize>> {
        self.linears
            .iter()
            .map(|linear| linear.bias.as_ref().map(|bias| bias.val().dims()[0]))
            .collect()
    }

    /// モデルの順伝播を実行します。
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let (output, hidden) = self.layers();
        let mut x = input;
        for linear in hidden {
            x = self.activation().forward(linear.forward(x));
        }
        output.forward(x)
    }

    /// 順伝播と同時に、入力座標についての出力の勾配 `∂u/∂x` を計算します。
    ///
    /// 各座標方向の接ベクトルを層ごとに `t ← σ'(z) ⊙ (t W)` で伝播します。
    /// すべて微分可能なテンソル演算なので、勾配を含む損失からパラメータへ逆伝播できます。
    /// 戻り値は `([N, 1], [N, 3])`。
    pub fn forward_with_input_gradient(&self, input: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [n_points, d_input] = input.dims();
        let device = input.device();
        let (output, hidden) = self.layers();

        let mut tangents: Vec<Tensor<B, 2>> = (0..d_input)
            .map(|direction| unit_column::<B>(n_points, d_input, direction, &device))
            .collect();
        let mut x = input;
        for linear in hidden {
            let z = linear.forward(x);
            let slope = self.activation().derivative(z.clone());
            let weight = linear.weight.val();
            tangents = tangents
                .into_iter()
                .map(|t| t.matmul(weight.clone()).mul(slope.clone()))
                .collect();
            x = self.activation().forward(z);
        }
        let weight = output.weight.val();
        let gradient: Vec<Tensor<B, 2>> = tangents
            .into_iter()
            .map(|t| t.matmul(weight.clone()))
            .collect();
        (output.forward(x), Tensor::cat(gradient, 1))
    }
}

/// 全行が単位ベクトル `e_direction` の `[n, dim]` テンソル。
fn unit_column<B: Backend>(
    n_points: usize,
    dim: usize,
    direction: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let mut data = vec![0.0f64; n_points * dim];
    for row in data.chunks_exact_mut(dim) {
        row[direction] = 1.0;
    }
    Tensor::from_data(TensorData::new(data, [n_points, dim]), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray<f64>;
    type TestAutodiffBackend = Autodiff<NdArray<f64>>;

    fn sample_coords<B: Backend>(device: &B::Device) -> Tensor<B, 2> {
        let data: Vec<f64> = (0..24).map(|i| ((i * 7) % 11) as f64 / 11.0 - 0.4).collect();
        Tensor::from_data(TensorData::new(data, [8, 3]), device)
    }

    #[test]
    fn single_hidden_layer_maps_input_to_output() {
        let device = Default::default();
        let model = ModelConfig::new(vec![5])
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(model.layer_dims(), vec![(3, 5), (5, 1)]);
        assert_eq!(model.bias_dims(), vec![Some(5), Some(1)]);
        let out = model.forward(sample_coords(&device));
        assert_eq!(out.dims(), [8, 1]);
    }

    #[test]
    fn layer_shapes_follow_widths() {
        let device = Default::default();
        let model = ModelConfig::new(vec![8, 4, 6])
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(model.layer_dims(), vec![(3, 8), (8, 4), (4, 6), (6, 1)]);
        let expected = 3 * 8 + 8 + 8 * 4 + 4 + 4 * 6 + 6 + 6 + 1;
        assert_eq!(model.num_params(), expected);
    }

    #[test]
    fn empty_or_zero_width_is_rejected() {
        let device = Default::default();
        assert!(matches!(
            ModelConfig::new(vec![]).init::<TestBackend>(&device),
            Err(Error::InvalidConfig(_))
        ));
        assert!(ModelConfig::new(vec![4, 0]).init::<TestBackend>(&device).is_err());
    }

    #[test]
    fn tangent_gradient_matches_reverse_mode() {
        let device = Default::default();
        for activation in [
            Activation::Gelu,
            Activation::Tanh,
            Activation::Sigmoid,
            Activation::Relu,
        ] {
            let model = ModelConfig::new(vec![6, 5])
                .with_activation(activation)
                .init::<TestAutodiffBackend>(&device)
                .unwrap();
            let coords = sample_coords::<TestAutodiffBackend>(&device).require_grad();

            let u = model.forward(coords.clone());
            let grads = u.sum().backward();
            let reverse = coords
                .grad(&grads)
                .unwrap()
                .into_data()
                .to_vec::<f64>()
                .unwrap();

            let (_, tangent) = model.forward_with_input_gradient(coords.clone());
            let tangent = tangent.into_data().to_vec::<f64>().unwrap();

            // burn の gelu の逆伝播は tanh 近似の導関数を使う
            let tolerance = if activation == Activation::Gelu { 1e-2 } else { 1e-9 };
            assert_eq!(reverse.len(), tangent.len());
            for (r, t) in reverse.iter().zip(&tangent) {
                assert!((r - t).abs() < tolerance, "{activation:?}: {r} vs {t}");
            }
        }
    }

    #[test]
    fn gelu_derivative_matches_finite_difference() {
        let device = Default::default();
        let h = 1e-4;
        let z: Vec<f64> = vec![-2.0, -0.5, 0.0, 0.3, 1.7];
        let at = |v: Vec<f64>| Tensor::<TestBackend, 1>::from_data(TensorData::new(v, [5]), &device);
        let plus = Activation::Gelu
            .forward(at(z.iter().map(|v| v + h).collect()))
            .into_data()
            .to_vec::<f64>()
            .unwrap();
        let minus = Activation::Gelu
            .forward(at(z.iter().map(|v| v - h).collect()))
            .into_data()
            .to_vec::<f64>()
            .unwrap();
        let analytic = Activation::Gelu
            .derivative(at(z.clone()))
            .into_data()
            .to_vec::<f64>()
            .unwrap();
        for i in 0..z.len() {
            let numeric = (plus[i] - minus[i]) / (2.0 * h);
            assert!((numeric - analytic[i]).abs() < 1e-4);
        }
    }
}

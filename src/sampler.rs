//! 学習用サブセットの無作為抽出。

use crate::error::{Error, Result};
use crate::view::{CoordinateView, FieldView};
use burn::prelude::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};

/// 学習に使う点の割合の既定値 (全点の10%)
pub const TRAINING_FRACTION: f64 = 0.1;

/// 領域の点から一定割合を重複なしで抽出するサンプラー。
#[derive(Debug, Clone)]
pub struct Sampler {
    fraction: f64,
    seed: Option<u64>,
}

/// 抽出された学習用インデックス。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingSubset {
    pub indices: Vec<usize>,
    /// 実際に使った乱数シード。シード未指定の実行でも再現できるよう記録します。
    pub seed: u64,
}

/// 学習に使う座標と真値のテンソル。
#[derive(Debug, Clone)]
pub struct TrainingData<B: Backend> {
    pub coords: Tensor<B, 2>,
    pub values: Tensor<B, 2>,
}

impl Sampler {
    pub fn new(fraction: f64) -> Result<Self> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "学習データの割合は (0, 1] の範囲で指定してください: {fraction}"
            )));
        }
        Ok(Self {
            fraction,
            seed: None,
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// `n_points` 点から抽出される点数 `⌊fraction·N⌋`。
    pub fn subset_len(&self, n_points: usize) -> usize {
        (self.fraction * n_points as f64).floor() as usize
    }

    /// `[0, n_points)` を並べ替え、先頭の `⌊fraction·N⌋` 個を返します。空の場合もあります。
    pub fn sample(&self, n_points: usize) -> TrainingSubset {
        let n_train = self.subset_len(n_points);
        let seed = self.seed.unwrap_or_else(|| StdRng::from_os_rng().next_u64());
        let mut rng = StdRng::seed_from_u64(seed);
        let mut indices: Vec<usize> = (0..n_points).collect();
        indices.shuffle(&mut rng);
        indices.truncate(n_train);
        log::debug!("{n_points} 点から {n_train} 点を抽出しました (seed = {seed})");
        TrainingSubset { indices, seed }
    }
}

impl TrainingSubset {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// 全点のテンソルから学習用の行を取り出します。
    ///
    /// 座標テンソルは入力についての勾配を追跡するよう設定されます。
    /// 学習点が1つもなければテンソルを確保する前に失敗します。
    pub fn gather<B: Backend>(
        &self,
        coords: CoordinateView<'_>,
        values: FieldView<'_>,
        device: &B::Device,
    ) -> Result<TrainingData<B>> {
        if self.is_empty() {
            return Err(Error::EmptyTrainingSet {
                points: coords.len(),
            });
        }
        if coords.len() != values.len() {
            return Err(Error::ShapeMismatch {
                what: "スカラー場と座標の点数",
                expected: coords.len(),
                actual: values.len(),
            });
        }
        if let Some(&bad) = self.indices.iter().find(|&&i| i >= coords.len()) {
            return Err(Error::ShapeMismatch {
                what: "学習用インデックスの範囲",
                expected: coords.len(),
                actual: bad,
            });
        }
        let index_data: Vec<i64> = self.indices.iter().map(|&i| i as i64).collect();
        let indices =
            Tensor::<B, 1, Int>::from_data(TensorData::new(index_data, [self.len()]), device);
        let coords = coords
            .to_tensor::<B>(device)
            .select(0, indices.clone())
            .require_grad();
        let values = values.to_tensor::<B>(device).select(0, indices);
        Ok(TrainingData { coords, values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use std::collections::HashSet;

    type TestBackend = NdArray<f64>;

    #[test]
    fn subset_has_floor_size_and_unique_indices() {
        for &n in &[0usize, 1, 5, 9, 10, 57, 100, 1000] {
            for &fraction in &[0.05, 0.1, 0.5, 0.99, 1.0] {
                let sampler = Sampler::new(fraction).unwrap().with_seed(7);
                let expected = (fraction * n as f64).floor() as usize;
                let subset = sampler.sample(n);
                assert_eq!(subset.len(), expected);
                let unique: HashSet<_> = subset.indices.iter().copied().collect();
                assert_eq!(unique.len(), expected);
                assert!(subset.indices.iter().all(|&i| i < n));
            }
        }
    }

    #[test]
    fn fixed_seed_is_reproducible() {
        let a = Sampler::new(0.1).unwrap().with_seed(42).sample(500);
        let b = Sampler::new(0.1).unwrap().with_seed(42).sample(500);
        assert_eq!(a, b);
    }

    #[test]
    fn recorded_seed_reproduces_unseeded_run() {
        let first = Sampler::new(0.2).unwrap().sample(200);
        let again = Sampler::new(0.2).unwrap().with_seed(first.seed).sample(200);
        assert_eq!(first.indices, again.indices);
    }

    #[test]
    fn invalid_fraction_is_rejected() {
        assert!(Sampler::new(0.0).is_err());
        assert!(Sampler::new(1.5).is_err());
        assert!(Sampler::new(f64::NAN).is_err());
    }

    #[test]
    fn empty_subset_is_rejected_before_training() {
        let device = Default::default();
        let points = [[0.0; 3]; 5];
        let field = [1.0; 5];
        let subset = Sampler::new(0.1).unwrap().with_seed(1).sample(5);
        assert!(subset.is_empty());
        let err = subset
            .gather::<TestBackend>(
                CoordinateView::from_points(&points),
                FieldView::new(&field, 5).unwrap(),
                &device,
            )
            .unwrap_err();
        assert!(matches!(err, Error::EmptyTrainingSet { points: 5 }));
    }

    #[test]
    fn gather_keeps_index_correspondence() {
        let device = Default::default();
        let points: Vec<[f64; 3]> = (0..20).map(|i| [i as f64, 0.0, 0.0]).collect();
        let field: Vec<f64> = (0..20).map(|i| 10.0 * i as f64).collect();
        let coords = CoordinateView::from_points(&points);
        let values = FieldView::new(&field, 20).unwrap();

        let subset = Sampler::new(0.25).unwrap().with_seed(3).sample(20);
        let data = subset
            .gather::<TestBackend>(coords, values, &device)
            .unwrap();
        assert_eq!(data.coords.dims(), [5, 3]);
        assert_eq!(data.values.dims(), [5, 1]);

        let xs = data.coords.into_data().to_vec::<f64>().unwrap();
        let vs = data.values.into_data().to_vec::<f64>().unwrap();
        for (row, &index) in subset.indices.iter().enumerate() {
            assert_eq!(xs[row * 3], index as f64);
            assert_eq!(vs[row], 10.0 * index as f64);
        }
    }
}

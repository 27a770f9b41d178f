use burn::backend::{Autodiff, NdArray};
use burn::prelude::Backend;
use pinn_field::config::{Hyperparameters, REPORT_INTERVAL};
use pinn_field::evaluation::Evaluator;
use pinn_field::mesh::{CartesianMesh, FieldShape, Mesh};
use pinn_field::model::ModelConfig;
use pinn_field::pinn::PhysicsLoss;
use pinn_field::run_log::{HEADER, RunHeader, RunLog, read_log};
use pinn_field::sampler::Sampler;
use pinn_field::training::{StopReason, Trainer, TrainerConfig};
use pinn_field::view::{CoordinateView, FieldView};
use pinn_field::Error;

type TestBackend = Autodiff<NdArray<f64>>;

fn trainer(hyper: &Hyperparameters) -> Trainer {
    Trainer::new(TrainerConfig {
        optimizer_step: hyper.optimizer_step,
        max_iterations: hyper.max_iterations,
        loss: PhysicsLoss::default(),
        report_interval: REPORT_INTERVAL,
    })
}

#[test]
fn hundred_points_five_epochs() {
    let device = Default::default();
    TestBackend::seed(11);
    // 10 x 10 x 1 = 100 セル
    let mesh = CartesianMesh::unit_cube([10, 10, 1]).unwrap();
    let input = FieldShape::Distance.sample(&mesh, "vf");
    let hyper = Hyperparameters {
        hidden_layers: vec![8, 8],
        optimizer_step: 0.01,
        max_iterations: 5,
    };

    let subset = Sampler::new(0.1).unwrap().with_seed(5).sample(mesh.n_cells());
    assert_eq!(subset.len(), 10);
    let data = subset
        .gather::<TestBackend>(
            mesh.coordinates(),
            FieldView::new(&input.values, mesh.n_cells()).unwrap(),
            &device,
        )
        .unwrap();
    let model = ModelConfig::new(hyper.hidden_layers.clone())
        .init::<TestBackend>(&device)
        .unwrap();

    let delta_x = mesh.characteristic_length().unwrap();
    let mut log = RunLog::new(Vec::new(), RunHeader::new(&hyper, delta_x)).unwrap();
    let outcome = trainer(&hyper).train(model, &data, &mut log);

    assert_eq!(outcome.stop, StopReason::Exhausted);
    assert_eq!(outcome.history.len(), 5);
    let epochs: Vec<usize> = outcome.history.iter().map(|r| r.epoch).collect();
    assert_eq!(epochs, vec![1, 2, 3, 4, 5]);
    assert!(outcome.min_loss <= outcome.history[0].total_loss);

    // ログを読み戻すと同じ記録が得られる
    let text = String::from_utf8(log.into_inner().unwrap()).unwrap();
    assert_eq!(text.lines().next(), Some(HEADER));
    let rows = read_log(text.as_bytes()).unwrap();
    assert_eq!(rows.len(), 5);
    for (row, record) in rows.iter().zip(&outcome.history) {
        assert_eq!(&row.record, record);
        assert_eq!(row.header.hidden_layers, vec![8, 8]);
        assert_eq!(row.header.delta_x, delta_x);
    }

    // 最良モデルで全セルを評価する
    let mut output = mesh.zero_field("vf_nn");
    let evaluation = Evaluator::default()
        .evaluate(&outcome.best, &mesh, &input, &mut output, &device)
        .unwrap();
    assert_eq!(evaluation.predicted.len(), 100);
    assert!(evaluation.max_abs_error.is_finite());
}

#[test]
fn constant_field_puts_the_two_losses_in_conflict() {
    let device = Default::default();
    TestBackend::seed(3);
    let mesh = CartesianMesh::unit_cube([12, 12, 1]).unwrap();
    let input = FieldShape::Constant.sample(&mesh, "vf");
    let hyper = Hyperparameters {
        hidden_layers: vec![16, 16],
        optimizer_step: 0.01,
        max_iterations: 150,
    };
    let data = Sampler::new(0.5)
        .unwrap()
        .with_seed(2)
        .sample(mesh.n_cells())
        .gather::<TestBackend>(
            mesh.coordinates(),
            FieldView::new(&input.values, mesh.n_cells()).unwrap(),
            &device,
        )
        .unwrap();
    let model = ModelConfig::new(hyper.hidden_layers.clone())
        .init::<TestBackend>(&device)
        .unwrap();

    let outcome = trainer(&hyper).train(model, &data, &mut ());
    assert_eq!(outcome.history.len(), 150);
    for record in &outcome.history {
        let sum = record.data_loss + record.gradient_loss;
        assert!((record.total_loss - sum).abs() <= 1e-12 * sum.max(1.0));
    }
    assert!(outcome.min_loss < outcome.history[0].total_loss);

    // 一定値の場は |∇u| = 1 を満たせないため、どちらの項も0にはならない
    let best = &outcome.history[outcome.best_epoch.unwrap() - 1];
    assert!(best.data_loss > 0.0);
    assert!(best.gradient_loss > 0.0);
}

#[test]
fn single_hidden_layer_trains() {
    let device = Default::default();
    let mesh = CartesianMesh::unit_cube([6, 6, 3]).unwrap();
    let input = FieldShape::Linear.sample(&mesh, "vf");
    let data = Sampler::new(0.2)
        .unwrap()
        .with_seed(8)
        .sample(mesh.n_cells())
        .gather::<TestBackend>(
            mesh.coordinates(),
            FieldView::new(&input.values, mesh.n_cells()).unwrap(),
            &device,
        )
        .unwrap();
    let model = ModelConfig::new(vec![4])
        .init::<TestBackend>(&device)
        .unwrap();
    assert_eq!(model.layer_dims(), vec![(3, 4), (4, 1)]);
    let hyper = Hyperparameters {
        hidden_layers: vec![4],
        optimizer_step: 0.005,
        max_iterations: 3,
    };
    let outcome = trainer(&hyper).train(model, &data, &mut ());
    assert_eq!(outcome.history.len(), 3);
}

#[test]
fn wrong_coordinate_length_fails_before_training() {
    let coords = vec![0.0; 3 * 100 - 1];
    let err = CoordinateView::new(&coords, 100).unwrap_err();
    assert!(matches!(
        err,
        Error::ShapeMismatch {
            expected: 300,
            actual: 299,
            ..
        }
    ));
}

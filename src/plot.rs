use crate::error::{Error, Result};
use crate::training::EpochRecord;
use plotters::prelude::*;
use std::path::Path;

/// 学習過程の損失をグラフとしてPNGファイルに出力します。
///
/// 縦軸は log10 スケールです。正でない損失はグラフから除きます。
pub fn plot_loss_history(history: &[EpochRecord], path: &Path) -> Result<()> {
    draw(history, path).map_err(|e| Error::Plot(e.to_string()))
}

fn log_points(history: &[EpochRecord], loss: impl Fn(&EpochRecord) -> f64) -> Vec<(usize, f64)> {
    history
        .iter()
        .map(|r| (r.epoch, loss(r)))
        .filter(|(_, v)| v.is_finite() && *v > 0.0)
        .map(|(epoch, v)| (epoch, v.log10()))
        .collect()
}

fn draw(history: &[EpochRecord], path: &Path) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let series = [
        ("Training MSE", log_points(history, |r| r.total_loss), RED),
        ("Data MSE", log_points(history, |r| r.data_loss), GREEN),
        ("Grad MSE", log_points(history, |r| r.gradient_loss), BLUE),
    ];
    let (min_log_loss, max_log_loss) = series
        .iter()
        .flat_map(|(_, points, _)| points.iter().map(|(_, v)| *v))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !min_log_loss.is_finite() {
        return Err("描画できる損失がありません".into());
    }
    let last_epoch = history.last().map_or(1, |r| r.epoch).max(2);

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Loss History", ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(1..last_epoch, (min_log_loss - 0.5)..(max_log_loss + 0.5))?;
    chart
        .configure_mesh()
        .y_desc("Loss (log10 scale)")
        .x_desc("Epoch")
        .draw()?;
    for (label, points, color) in series {
        chart
            .draw_series(LineSeries::new(points, &color))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
    }
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_losses_are_skipped() {
        let history = [
            EpochRecord {
                epoch: 1,
                data_loss: 0.0,
                gradient_loss: 10.0,
                total_loss: 10.0,
            },
            EpochRecord {
                epoch: 2,
                data_loss: 0.01,
                gradient_loss: f64::NAN,
                total_loss: 1.0,
            },
        ];
        assert_eq!(log_points(&history, |r| r.total_loss), vec![(1, 1.0), (2, 0.0)]);
        let data = log_points(&history, |r| r.data_loss);
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].0, 2);
        assert!((data[0].1 + 2.0).abs() < 1e-12);
        assert_eq!(log_points(&history, |r| r.gradient_loss), vec![(1, 1.0)]);
    }

    #[test]
    fn empty_history_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = plot_loss_history(&[], &dir.path().join("loss.png")).unwrap_err();
        assert!(matches!(err, Error::Plot(_)));
    }
}

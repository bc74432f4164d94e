// ============================================================
// Layer 5 — Loss History and Curve Sink
// ============================================================
// Records per-epoch train/eval loss for every fold and persists
// the result twice:
//
//   1. Raw CSV rows  — fold,epoch,train_loss,eval_loss
//   2. A line plot   — one colour per fold, solid line for the
//                      train series, dashed for the eval series
//
// The history grows by appending: cross-validation knows its epoch
// count up front, the all-data phase does not, so the container
// never preallocates an epoch axis.
//
// Reference: plotters crate documentation
//            Rust Book §12 (I/O and File Handling)

use std::{
    fs::{self, File},
    io::Write,
    path::PathBuf,
};

use anyhow::{anyhow, Context, Result};
use plotters::prelude::*;
use plotters::series::DashedLineSeries;
use serde::{Deserialize, Serialize};

/// One epoch's mean train and eval loss for a single fold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochLoss {
    pub train: f32,
    pub eval:  f32,
}

/// Append-only `[fold, epoch, {train, eval}]` loss record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossHistory {
    folds: Vec<Vec<EpochLoss>>,
}

impl LossHistory {
    /// An empty history with one growable row per fold.
    pub fn new(partitions: usize) -> Self {
        Self { folds: vec![Vec::new(); partitions] }
    }

    pub fn push(&mut self, fold: usize, loss: EpochLoss) {
        self.folds[fold].push(loss);
    }

    pub fn partitions(&self) -> usize {
        self.folds.len()
    }

    /// Number of recorded epochs (the longest fold row).
    pub fn epochs(&self) -> usize {
        self.folds.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.epochs() == 0
    }

    pub fn get(&self, fold: usize, epoch: usize) -> Option<EpochLoss> {
        self.folds.get(fold).and_then(|row| row.get(epoch)).copied()
    }

    pub fn fold(&self, fold: usize) -> &[EpochLoss] {
        &self.folds[fold]
    }

    /// Mean train and eval loss across folds at each fold's final
    /// recorded epoch. None when nothing has been recorded.
    pub fn final_epoch_means(&self) -> Option<(f64, f64)> {
        let finals: Vec<EpochLoss> = self
            .folds
            .iter()
            .filter_map(|row| row.last().copied())
            .collect();
        if finals.is_empty() {
            return None;
        }
        let n = finals.len() as f64;
        Some((
            finals.iter().map(|l| l.train as f64).sum::<f64>() / n,
            finals.iter().map(|l| l.eval as f64).sum::<f64>() / n,
        ))
    }
}

/// Fold colours, cycled when there are more folds than entries.
const FOLD_COLORS: [RGBColor; 7] = [RED, BLUE, YELLOW, BLACK, GREEN, MAGENTA, CYAN];

/// Writes loss histories into a directory as CSV plus a rendered plot.
pub struct LossCurveSink {
    dir: PathBuf,
}

impl LossCurveSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        fs::create_dir_all(&dir).ok();
        Self { dir }
    }

    /// Persist `history` as `{name}.csv` and `{name}.png`. An empty
    /// history still writes the CSV header but skips the plot.
    pub fn save(&self, name: &str, history: &LossHistory) -> Result<()> {
        self.write_csv(name, history)?;

        if history.is_empty() {
            tracing::warn!("'{name}' has no recorded epochs — skipping the plot");
            return Ok(());
        }
        self.render_plot(name, history)?;

        tracing::debug!("Saved loss curves '{name}' to '{}'", self.dir.display());
        Ok(())
    }

    fn write_csv(&self, name: &str, history: &LossHistory) -> Result<()> {
        let path = self.dir.join(format!("{name}.csv"));
        let mut file = File::create(&path)
            .with_context(|| format!("Cannot create '{}'", path.display()))?;

        writeln!(file, "fold,epoch,train_loss,eval_loss")?;
        for fold in 0..history.partitions() {
            for (epoch, loss) in history.fold(fold).iter().enumerate() {
                writeln!(file, "{},{},{:.6},{:.6}", fold, epoch, loss.train, loss.eval)?;
            }
        }
        Ok(())
    }

    fn render_plot(&self, name: &str, history: &LossHistory) -> Result<()> {
        let path = self.dir.join(format!("{name}.png"));
        draw_loss_chart(&path, name, history)
            .map_err(|e| anyhow!("Cannot render '{}': {}", path.display(), e))
    }
}

fn draw_loss_chart(
    path:    &PathBuf,
    caption: &str,
    history: &LossHistory,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let root = BitMapBackend::new(path, (960, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let x_max = history.epochs().saturating_sub(1).max(1) as f32;
    let y_max = (0..history.partitions())
        .flat_map(|fold| history.fold(fold).iter())
        .flat_map(|l| [l.train, l.eval])
        .filter(|v| v.is_finite())
        .fold(f32::EPSILON, f32::max);

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .caption(caption, ("sans-serif", 22))
        .x_label_area_size(40)
        .y_label_area_size(55)
        .build_cartesian_2d(0f32..x_max, 0f32..y_max * 1.05)?;
    chart.configure_mesh().x_desc("epoch").y_desc("loss").draw()?;

    for fold in 0..history.partitions() {
        let color = FOLD_COLORS[fold % FOLD_COLORS.len()];
        let train_points: Vec<(f32, f32)> = history
            .fold(fold)
            .iter()
            .enumerate()
            .map(|(epoch, l)| (epoch as f32, l.train))
            .collect();
        let eval_points: Vec<(f32, f32)> = history
            .fold(fold)
            .iter()
            .enumerate()
            .map(|(epoch, l)| (epoch as f32, l.eval))
            .collect();

        chart
            .draw_series(LineSeries::new(train_points, &color))?
            .label(format!("fold {} train", fold + 1))
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 20, y)], color.filled())
            });
        chart.draw_series(DashedLineSeries::new(
            eval_points,
            5,
            3,
            color.stroke_width(1),
        ))?;
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

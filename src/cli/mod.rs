// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction.
// Uses the `clap` crate to parse command line arguments.
// All training logic is delegated to Layer 2 (application).
//
// One positional argument (where to store the model) plus the
// training hyperparameters as flags. No subcommands — this tool
// does exactly one thing: train the ensemble.
//
// Reference: Rust Book §12 (CLI programs)

use anyhow::Result;
use clap::Parser;

use crate::application::train_use_case::{TrainConfig, TrainUseCase};

/// The main CLI struct — clap reads the fields and generates
/// argument parsing code automatically via the Parser derive macro.
#[derive(Parser, Debug)]
#[command(
    name = "conv-ensemble",
    version = "0.1.0",
    about = "Train a k-fold ensemble of 1-D convolutional regression models."
)]
pub struct Cli {
    /// Directory in which to store the trained ensemble and loss curves
    pub model_dir: String,

    /// Number of partitions for k-fold cross-validation
    #[arg(long, default_value_t = 3)]
    pub partitions: usize,

    /// Number of samples per batch
    #[arg(long, default_value_t = 256)]
    pub batch_size: usize,

    /// Per-epoch multiplier on the batch size (1.0 = no change)
    #[arg(long, default_value_t = 1.0)]
    pub batch_size_annealing: f64,

    /// Number of cross-validation epochs to train each fold for
    #[arg(long, default_value_t = 25)]
    pub epochs: usize,

    /// Learning rate for the Adam optimizer
    #[arg(long, default_value_t = 1e-3)]
    pub learning_rate: f64,

    /// Weight batch sampling by per-example training loss
    /// instead of iterating contiguous shuffled slices
    #[arg(long)]
    pub loss_sampling: bool,
}

impl Cli {
    /// Convert the parsed arguments into a TrainConfig and hand off
    /// to Layer 2. The CLI layer only routes, never computes.
    pub fn run(self) -> Result<()> {
        tracing::info!("Storing model artifacts in: {}", self.model_dir);

        let use_case = TrainUseCase::new(self.into());
        use_case.execute()?;

        println!("Ensemble and loss curves saved.");
        Ok(())
    }
}

/// Boundary between Layer 1 and Layer 2 —
/// the application layer never sees clap types.
impl From<Cli> for TrainConfig {
    fn from(a: Cli) -> Self {
        TrainConfig {
            model_dir:            a.model_dir,
            partitions:           a.partitions,
            batch_size:           a.batch_size,
            batch_size_annealing: a.batch_size_annealing,
            epochs:               a.epochs,
            learning_rate:        a.learning_rate,
            loss_sampling:        a.loss_sampling,
        }
    }
}

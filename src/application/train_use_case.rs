// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Load the paired dataset      (Layer 5 - infra)
//   Step 2: Load or seed the fold models (Layer 5 - infra)
//   Step 3: Save config                  (Layer 5 - infra)
//   Step 4: Run training                 (Layer 4 - ml)
//   Step 5: Persist loss curves          (Layer 5 - infra)
//   Step 6: Persist the ensemble         (Layer 5 - infra)
//
// Reference: Burn Book §5 (Training)

use anyhow::Result;
use burn::backend::ndarray::NdArrayDevice;
use serde::{Deserialize, Serialize};

use crate::infra::{
    dataset_store::DatasetStore,
    loss_curves::LossCurveSink,
    model_store::{ModelLoadOutcome, ModelStore},
};
use crate::ml::model::{ConvModel, ConvModelConfig};
use crate::ml::trainer::{run_training, HostBackend, TrainingBackend};

// ─── Training Configuration ──────────────────────────────────────────────────
// All hyperparameters for a training run.
// Serialisable so it can be saved to disk next to the model it produced,
// and compared against on a later run before reusing the persisted weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub model_dir:            String,
    pub partitions:           usize,
    pub batch_size:           usize,
    pub batch_size_annealing: f64,
    pub epochs:               usize,
    pub learning_rate:        f64,
    pub loss_sampling:        bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            model_dir:            "model".to_string(),
            partitions:           3,
            batch_size:           256,
            batch_size_annealing: 1.0,
            epochs:               25,
            learning_rate:        1e-3,
            loss_sampling:        false,
        }
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
// Owns the config and runs the full training pipeline.
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    /// Create a new TrainUseCase with the given configuration
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<()> {
        let cfg    = &self.config;
        let device = NdArrayDevice::default();

        // ── Step 1: Load the paired dataset ───────────────────────────────────
        // Two tensor files with a shared leading dimension: inputs[i]
        // pairs with outputs[i]. Kept host-resident; batches are placed
        // onto the training backend one at a time.
        let dataset = DatasetStore::from_working_dir().load::<HostBackend>(&device)?;
        tracing::info!("Loaded {} paired examples", dataset.len());

        // ── Step 2: Load a persisted ensemble or seed fresh fold models ───────
        // A usable persisted ensemble seeds the fold models directly;
        // anything else falls back to one freshly initialised base model
        // cloned per fold, so every fold starts from identical weights.
        let store = ModelStore::new(&cfg.model_dir);
        let seeds: Vec<ConvModel<TrainingBackend>> =
            match store.load::<TrainingBackend>(cfg.partitions, &device) {
                ModelLoadOutcome::Found(ensemble) => {
                    tracing::info!("Continuing from the persisted ensemble");
                    ensemble.into_models()
                }
                ModelLoadOutcome::Absent => {
                    tracing::info!("No persisted model found — training from scratch");
                    seed_models(cfg.partitions, &device)
                }
                ModelLoadOutcome::Incompatible(reason) => {
                    tracing::warn!("Persisted model unusable ({reason}) — training from scratch");
                    seed_models(cfg.partitions, &device)
                }
            };

        // ── Step 3: Save config next to the artifacts ─────────────────────────
        // Later runs compare against it before reusing persisted weights.
        store.save_config(cfg)?;

        // ── Step 4: Run training (Layer 4) ────────────────────────────────────
        // Cross-validation, ensemble diagnostics, then the open-ended
        // all-data phase. Whatever state the all-data phase reaches is
        // what comes back — it never fails out of this call.
        let (ensemble, cv_losses, ad_losses) = run_training(cfg, seeds, dataset)?;

        // ── Step 5: Persist loss curves ───────────────────────────────────────
        let sink = LossCurveSink::new(&cfg.model_dir);
        sink.save("cross_validation_losses", &cv_losses)?;
        sink.save("all_data_losses", &ad_losses)?;

        // ── Step 6: Persist the ensemble ──────────────────────────────────────
        store.save(&ensemble)?;

        Ok(())
    }
}

/// One freshly initialised base model, cloned once per fold.
fn seed_models(
    partitions: usize,
    device:     &NdArrayDevice,
) -> Vec<ConvModel<TrainingBackend>> {
    let base: ConvModel<TrainingBackend> = ConvModelConfig::new().init(device);
    vec![base; partitions]
}

// ============================================================
// Layer 5 — Model Store
// ============================================================
// Saves and restores the trained ensemble using Burn's
// CompactRecorder.
//
// What gets saved per run:
//   1. ensemble weights  — every fold model's parameters
//                          (the recorder appends its own extension)
//   2. train_config.json — the hyperparameters of the run
//
// Loading is deliberately never fatal: the trainer can always fall
// back to a freshly initialised model, so the outcome is an explicit
// three-way enum instead of a Result. A persisted ensemble is only
// usable as a seed when its member count matches the requested
// partition count; anything else — unreadable record, missing
// config, mismatched shape — is Incompatible, with the reason kept
// for the log line.
//
// Burn's CompactRecorder:
//   - Serialises model parameters to MessagePack format
//   - Compresses with gzip for smaller file size
//   - Type-safe: loading fails if the architecture doesn't match
//
// Reference: Burn Book §5 (Records and Checkpointing)
//            Rust Book §9 (Error Handling)

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};

use crate::application::train_use_case::TrainConfig;
use crate::ml::model::{ConvModelConfig, EnsembleModel};

/// What came out of an attempt to reuse a persisted ensemble.
pub enum ModelLoadOutcome<B: Backend> {
    /// A usable ensemble with the requested number of members.
    Found(EnsembleModel<B>),

    /// Nothing persisted at this location yet.
    Absent,

    /// Something is persisted but cannot seed this run.
    Incompatible(String),
}

/// Manages the model artifacts in one directory.
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    /// Create a store over `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        fs::create_dir_all(&dir).ok();
        Self { dir }
    }

    /// Try to reuse the persisted ensemble as this run's fold seeds.
    pub fn load<B: Backend>(
        &self,
        partitions: usize,
        device:     &B::Device,
    ) -> ModelLoadOutcome<B> {
        // The recorder appends its own extension to the base path, so
        // the config written next to the weights is the marker that a
        // run was persisted here at all.
        let base = self.dir.join("ensemble");
        if !self.dir.join("train_config.json").exists() {
            return ModelLoadOutcome::Absent;
        }

        // The saved config tells us how many members the record holds;
        // a record of the wrong width cannot seed this run.
        let saved = match self.load_config() {
            Ok(config) => config,
            Err(e) => {
                return ModelLoadOutcome::Incompatible(format!(
                    "cannot read the saved training config: {e}"
                ))
            }
        };
        if saved.partitions != partitions {
            return ModelLoadOutcome::Incompatible(format!(
                "persisted ensemble has {} members, this run wants {}",
                saved.partitions, partitions,
            ));
        }

        // Restore into a skeleton of the right shape.
        let skeleton = EnsembleModel::new(
            (0..partitions)
                .map(|_| ConvModelConfig::new().init(device))
                .collect(),
        );
        match CompactRecorder::new().load(base, device) {
            Ok(record) => ModelLoadOutcome::Found(skeleton.load_record(record)),
            Err(e) => ModelLoadOutcome::Incompatible(format!(
                "cannot load the ensemble record: {e}"
            )),
        }
    }

    /// Persist the ensemble. Records are device-neutral, so whatever
    /// backend trained the models, the artifact loads anywhere.
    pub fn save<B: Backend>(&self, ensemble: &EnsembleModel<B>) -> Result<()> {
        let base = self.dir.join("ensemble");
        CompactRecorder::new()
            .record(ensemble.clone().into_record(), base.clone())
            .with_context(|| format!("Failed to save the ensemble to '{}'", base.display()))?;

        tracing::debug!("Saved ensemble with {} members", ensemble.len());
        Ok(())
    }

    /// Save the training configuration to JSON so a later run can
    /// check the persisted ensemble against its own settings.
    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join("train_config.json");
        let json = serde_json::to_string_pretty(cfg)?;

        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;

        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    /// Load the training configuration of the persisted artifacts.
    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join("train_config.json");

        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;

        Ok(serde_json::from_str(&json)?)
    }
}

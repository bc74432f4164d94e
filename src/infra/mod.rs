// ============================================================
// Layer 5 — Infrastructure Layer
// ============================================================
// Handles all persistence concerns:
//
//   model_store.rs   — Saving and loading the trained ensemble
//                      with Burn's CompactRecorder, plus the
//                      explicit found/absent/incompatible outcome
//                      the training pipeline recovers from.
//
//   dataset_store.rs — Loading the paired input/output tensors
//                      from their fixed file locations.
//
//   loss_curves.rs   — The per-epoch loss history and its sink:
//                      raw CSV rows plus a rendered line plot.
//
// Reference: Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Ensemble checkpoint saving and loading
pub mod model_store;

/// Paired tensor dataset loading
pub mod dataset_store;

/// Loss history accumulation, CSV export, and plotting
pub mod loss_curves;

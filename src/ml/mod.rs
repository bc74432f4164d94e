// ============================================================
// Layer 4 — ML / Model Layer (Burn)
// ============================================================
// This layer contains ALL Burn training code.
//
// What's in this layer:
//
//   model.rs     — The 1-D convolutional regression stack and
//                  the mean-prediction ensemble wrapper
//
//   trainer.rs   — The three training phases:
//                  • k-fold cross-validation, one model and one
//                    Adam optimizer per fold
//                  • ensemble diagnostics over the pooled data
//                  • the open-ended all-data phase, which stops
//                    on the first failure and hands back whatever
//                    it reached
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Kohavi (1995) Cross-Validation and Model Selection

/// Convolutional regression model and ensemble wrapper
pub mod model;

/// Cross-validation, ensemble evaluation, and all-data training
pub mod trainer;

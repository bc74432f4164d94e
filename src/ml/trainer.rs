// ============================================================
// Layer 4 — Training Phases
// ============================================================
// Three phases, run in order over the same fold models:
//
//   1. k-fold cross-validation — the data (minus a 1% held-out
//      test split) is partitioned into K contiguous folds; each
//      fold trains its own clone of the seed model with its own
//      Adam optimizer for a fixed number of epochs, evaluating on
//      its fold slice after every training epoch.
//
//   2. Ensemble diagnostics — per-fold and mean-prediction loss
//      over the pooled cross-validation data. Logged only.
//
//   3. All-data training — an open-ended loop that keeps training
//      every fold model jointly on the pooled data, evaluating
//      against the fixed test split each epoch. The loop has no
//      exit condition of its own: it runs until an epoch fails
//      (or the operator kills the process), and the first failure
//      hands back the models and loss history reached so far
//      instead of propagating.
//
// Failure handling is deliberately asymmetric: a failure during
// cross-validation aborts the whole run, a failure during the
// all-data phase only ends it.
//
// Key Burn insight:
//   - Training uses TrainingBackend (Autodiff<NdArray>) for gradients
//   - model.valid() returns the model on HostBackend (NdArray),
//     which disables dropout and switches BatchNorm to running stats
//   - Batches live host-side and are placed onto the training
//     backend one at a time with Tensor::from_inner
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use anyhow::{anyhow, bail, Result};
use burn::{
    module::AutodiffModule,
    nn::loss::{MseLoss, Reduction},
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::Rng;

use crate::application::train_use_case::TrainConfig;
use crate::data::dataset::{fold_ranges, TensorPair};
use crate::data::sampler::{
    anneal_batch_size, sequential_batches, BatchIndices, LossWeights,
};
use crate::infra::loss_curves::{EpochLoss, LossHistory};
use crate::ml::model::{mean_prediction, ConvModel, EnsembleModel};

pub type TrainingBackend = burn::backend::Autodiff<burn::backend::NdArray>;
pub type HostBackend     = burn::backend::NdArray;

/// Run all three phases. The seeds are the K fold models (freshly
/// cloned or resumed); the dataset is the full paired data, host-side.
pub fn run_training<B: AutodiffBackend>(
    cfg:   &TrainConfig,
    seeds: Vec<ConvModel<B>>,
    data:  TensorPair<B::InnerBackend>,
) -> Result<(EnsembleModel<B>, LossHistory, LossHistory)> {
    // One shuffle up front, then carve off the fixed test split: the
    // first 1% never participates in cross-validation and serves as
    // the all-data phase's held-out evaluation set.
    let data = data.shuffled();
    let (test_split, pooled) = data.split_at(data.len() / 100);
    tracing::info!(
        "{} examples for cross-validation, {} held out for the all-data phase",
        pooled.len(),
        test_split.len(),
    );

    let optimizers: Vec<_> = seeds.iter().map(|_| AdamConfig::new().init()).collect();

    let (models, optimizers, cv_losses, batch_size) =
        cross_validate(cfg, seeds, optimizers, &pooled)?;

    evaluate_ensemble(&models, &pooled, batch_size);

    let (models, _optimizers, ad_losses) =
        train_on_all_data(cfg, models, optimizers, pooled, test_split, batch_size);

    Ok((EnsembleModel::new(models), cv_losses, ad_losses))
}

// ─── Training Step ────────────────────────────────────────────────────────────

/// One forward/backward/update cycle for one model on one batch.
/// Returns the per-example squared errors; the mean of those drives
/// the backward pass. Models and optimizers move by value — Burn's
/// optimizer consumes the module it updates.
fn step<B, O>(
    model:         ConvModel<B>,
    mut optimizer: O,
    inputs:        Tensor<B, 3>,
    targets:       Tensor<B, 1>,
    learning_rate: f64,
) -> (ConvModel<B>, O, Tensor<B, 1>)
where
    B: AutodiffBackend,
    O: Optimizer<ConvModel<B>, B>,
{
    let predictions = model.forward(inputs).flatten(0, 1);
    let losses = MseLoss::new().forward_no_reduction(predictions, targets);

    let mean  = losses.clone().mean();
    let grads = GradientsParams::from_grads(mean.backward(), &model);
    let model = optimizer.step(learning_rate, model, grads);

    (model, optimizer, losses)
}

// ─── Cross-Validation ─────────────────────────────────────────────────────────

/// Train every fold to completion. Fold k evaluates on the k-th
/// contiguous slice and trains on its complement. Returns the trained
/// models with their optimizers (their state carries into the all-data
/// phase), the `[fold, epoch, {train, eval}]` history, and the batch
/// size as the final fold's annealing left it.
fn cross_validate<B, O>(
    cfg:        &TrainConfig,
    models:     Vec<ConvModel<B>>,
    optimizers: Vec<O>,
    data:       &TensorPair<B::InnerBackend>,
) -> Result<(Vec<ConvModel<B>>, Vec<O>, LossHistory, usize)>
where
    B: AutodiffBackend,
    O: Optimizer<ConvModel<B>, B>,
{
    let ranges      = fold_ranges(data.len(), cfg.partitions);
    let mut history = LossHistory::new(cfg.partitions);

    let mut trained_models     = Vec::with_capacity(cfg.partitions);
    let mut trained_optimizers = Vec::with_capacity(cfg.partitions);
    let mut batch_size         = cfg.batch_size;

    for (fold, ((model, optimizer), range)) in
        models.into_iter().zip(optimizers).zip(ranges).enumerate()
    {
        let eval_split  = data.range(range.clone());
        let train_split = data.complement(&range);

        let (model, optimizer, annealed) = train_fold(
            cfg, fold, model, optimizer, train_split, eval_split, &mut history,
        )?;
        batch_size = annealed;

        trained_models.push(model);
        trained_optimizers.push(optimizer);
    }

    if let Some((train_mean, eval_mean)) = history.final_epoch_means() {
        println!(
            "Mean train / eval loss across folds at {} epochs: {:.4} / {:.4}",
            cfg.epochs, train_mean, eval_mean,
        );
    }

    Ok((trained_models, trained_optimizers, history, batch_size))
}

/// The fixed-epoch train/eval loop for one fold. Batch size resets to
/// the configured base here and anneals once per epoch; the value left
/// at the end is handed back to the orchestrator.
fn train_fold<B, O>(
    cfg:       &TrainConfig,
    fold:      usize,
    mut model: ConvModel<B>,
    mut optimizer: O,
    train:     TensorPair<B::InnerBackend>,
    eval:      TensorPair<B::InnerBackend>,
    history:   &mut LossHistory,
) -> Result<(ConvModel<B>, O, usize)>
where
    B: AutodiffBackend,
    O: Optimizer<ConvModel<B>, B>,
{
    let mut batch_size = cfg.batch_size;
    let mut weights    = cfg.loss_sampling.then(|| LossWeights::zeros(train.len()));
    let mut rng        = rand::thread_rng();

    // Constant-predictor error of the eval targets, fixed before any
    // training: the denominator of the pseudo-R² readout.
    let baseline = baseline_error(&eval.outputs);

    let mut train = train;
    let mut eval  = eval;

    for epoch in 0..cfg.epochs {
        batch_size = anneal_batch_size(batch_size, cfg.batch_size_annealing);
        if batch_size == 0 {
            bail!("batch size annealed to zero entering epoch {} of fold {}", epoch + 1, fold + 1);
        }

        // Train epoch.
        train = train.shuffled();
        let n_batches = train.len().div_ceil(batch_size);
        let mut batch_means = Vec::with_capacity(n_batches);

        for i_batch in 0..n_batches {
            let indices = batch_indices(
                epoch, i_batch, batch_size, train.len(), weights.as_ref(), &mut rng,
            )?;
            let batch = train.batch(&indices);
            if batch.is_empty() {
                continue;
            }

            let inputs  = Tensor::from_inner(batch.inputs);
            let targets = Tensor::from_inner(batch.outputs);
            let (updated, opt, losses) = step(model, optimizer, inputs, targets, cfg.learning_rate);
            model     = updated;
            optimizer = opt;

            batch_means.push(losses.clone().mean().into_scalar().elem::<f64>());
            if let Some(w) = weights.as_mut() {
                w.record(&indices, &to_f32_vec(losses.detach().inner())?);
            }
        }
        let train_loss = mean_of(&batch_means);

        // Eval epoch: sequential batches only, loss summed then
        // normalised by the example count.
        eval = eval.shuffled();
        let eval_loss = mean_squared_error(&model.valid(), &eval, batch_size);

        history.push(fold, EpochLoss { train: train_loss as f32, eval: eval_loss as f32 });
        println!(
            "Fold {} epoch {:>3}/{} | train={:.4} | eval={:.4} | r2={:.3}",
            fold + 1,
            epoch + 1,
            cfg.epochs,
            train_loss,
            eval_loss,
            pseudo_r2(eval_loss, baseline),
        );
    }

    Ok((model, optimizer, batch_size))
}

/// Pick this batch's rows: loss-weighted draws once the weights have
/// been seeded, the plain sequential slice otherwise. Epoch 0 is always
/// sequential — the weight vector is still all zeros there.
fn batch_indices(
    epoch:      usize,
    i_batch:    usize,
    batch_size: usize,
    len:        usize,
    weights:    Option<&LossWeights>,
    rng:        &mut impl Rng,
) -> Result<BatchIndices> {
    match weights {
        Some(w) if epoch > 0 => Ok(BatchIndices::Drawn(w.draw(batch_size, rng)?)),
        _ => Ok(BatchIndices::Sequential(
            i_batch * batch_size..((i_batch + 1) * batch_size).min(len),
        )),
    }
}

// ─── Ensemble Diagnostics ─────────────────────────────────────────────────────

/// Per-fold and mean-prediction loss over one reshuffled pass of the
/// pooled data. Purely diagnostic: logged and returned, never persisted.
pub fn evaluate_ensemble<B: AutodiffBackend>(
    models:     &[ConvModel<B>],
    data:       &TensorPair<B::InnerBackend>,
    batch_size: usize,
) -> (Vec<f64>, f64) {
    let members: Vec<_> = models.iter().map(|m| m.valid()).collect();
    let data  = data.shuffled();
    let total = data.len().max(1);

    let mut sums = vec![0.0f64; members.len() + 1];
    for range in sequential_batches(data.len(), batch_size) {
        let batch = data.range(range);

        let predictions: Vec<Tensor<B::InnerBackend, 2>> = members
            .iter()
            .map(|m| m.forward(batch.inputs.clone()))
            .collect();
        for (i, prediction) in predictions.iter().enumerate() {
            sums[i] += sum_squared_error(prediction.clone().flatten(0, 1), batch.outputs.clone());
        }

        let combined = mean_prediction(predictions).flatten(0, 1);
        let last = sums.len() - 1;
        sums[last] += sum_squared_error(combined, batch.outputs.clone());
    }

    let mut means: Vec<f64> = sums.iter().map(|s| s / total as f64).collect();
    let ensemble_loss = means.pop().unwrap_or(f64::NAN);

    println!(
        "Per-fold / ensemble loss over all folds: [{}] / {:.4}",
        fmt_series(means.iter().copied()),
        ensemble_loss,
    );
    tracing::info!("Ensemble mean-prediction loss: {ensemble_loss:.6}");

    (means, ensemble_loss)
}

// ─── All-Data Training ────────────────────────────────────────────────────────

/// Keep training every fold model jointly on the pooled data, one
/// shared batch sequence per epoch, evaluating each model against the
/// fixed test split. Runs until an epoch fails; the failure is logged
/// and whatever models, optimizers, and history exist by then are
/// returned. Batch size stays wherever cross-validation left it.
pub fn train_on_all_data<B, O>(
    cfg:        &TrainConfig,
    models:     Vec<ConvModel<B>>,
    optimizers: Vec<O>,
    train:      TensorPair<B::InnerBackend>,
    test:       TensorPair<B::InnerBackend>,
    batch_size: usize,
) -> (Vec<ConvModel<B>>, Vec<O>, LossHistory)
where
    B: AutodiffBackend,
    O: Optimizer<ConvModel<B>, B>,
{
    let partitions = models.len();
    let baseline   = baseline_error(&test.outputs);

    let mut weights = cfg.loss_sampling.then(|| LossWeights::zeros(train.len()));
    let mut rng     = rand::thread_rng();

    let mut models     = models;
    let mut optimizers = optimizers;
    let mut train      = train;
    let mut test       = test;

    let epoch_records = run_until_failure(|epoch| {
        if batch_size == 0 {
            bail!("batch size is zero entering all-data epoch {}", epoch + 1);
        }
        if test.is_empty() {
            bail!("held-out test split is empty");
        }

        // Train epoch: one pass over the data drives every model.
        train = train.shuffled();
        let n_batches = train.len().div_ceil(batch_size);
        let mut loss_sums = vec![0.0f64; partitions];
        let mut counted   = 0usize;

        for i_batch in 0..n_batches {
            let indices = batch_indices(
                epoch, i_batch, batch_size, train.len(), weights.as_ref(), &mut rng,
            )?;
            let batch = train.batch(&indices);
            if batch.is_empty() {
                continue;
            }

            let inputs  = Tensor::from_inner(batch.inputs);
            let targets = Tensor::from_inner(batch.outputs);

            // Move every model through the step and straight back; the
            // vectors are whole again before anything fallible runs.
            let mut shared_losses: Option<Tensor<B::InnerBackend, 1>> = None;
            let stepped = std::mem::take(&mut models)
                .into_iter()
                .zip(std::mem::take(&mut optimizers));
            for (i, (model, optimizer)) in stepped.enumerate() {
                let (model, optimizer, losses) =
                    step(model, optimizer, inputs.clone(), targets.clone(), cfg.learning_rate);
                loss_sums[i] += losses.clone().mean().into_scalar().elem::<f64>();

                let detached = losses.detach().inner();
                shared_losses = Some(match shared_losses.take() {
                    Some(sum) => sum + detached,
                    None      => detached,
                });
                models.push(model);
                optimizers.push(optimizer);
            }
            counted += 1;

            if let (Some(w), Some(sum)) = (weights.as_mut(), shared_losses) {
                // The models disagree on per-example loss; their mean
                // decides the next draw.
                w.record(&indices, &to_f32_vec(sum.div_scalar(partitions as f64))?);
            }
        }

        // Eval epoch: every model against the fixed test split.
        test = test.shuffled();
        let records: Vec<EpochLoss> = models
            .iter()
            .enumerate()
            .map(|(i, model)| EpochLoss {
                train: if counted > 0 { (loss_sums[i] / counted as f64) as f32 } else { f32::NAN },
                eval:  mean_squared_error(&model.valid(), &test, batch_size) as f32,
            })
            .collect();

        println!(
            "All-data epoch {:>4} | train=[{}] | test=[{}] | r2=[{}]",
            epoch + 1,
            fmt_series(records.iter().map(|r| r.train as f64)),
            fmt_series(records.iter().map(|r| r.eval as f64)),
            fmt_series(records.iter().map(|r| pseudo_r2(r.eval as f64, baseline))),
        );
        Ok(records)
    });

    let mut history = LossHistory::new(partitions);
    for records in epoch_records {
        for (fold, record) in records.into_iter().enumerate() {
            history.push(fold, record);
        }
    }
    (models, optimizers, history)
}

/// Drive `epoch_fn` until it fails. The first error ends the loop and
/// is logged, never propagated: the records of every completed epoch
/// are all the caller gets, and all it needs.
pub fn run_until_failure<T>(mut epoch_fn: impl FnMut(usize) -> Result<T>) -> Vec<T> {
    let mut completed = Vec::new();
    for epoch in 0.. {
        match epoch_fn(epoch) {
            Ok(record) => completed.push(record),
            Err(error) => {
                tracing::error!(
                    "training loop stopped during epoch {}: {:?}", epoch + 1, error,
                );
                break;
            }
        }
    }
    completed
}

// ─── Shared Metrics ───────────────────────────────────────────────────────────

/// Mean squared error of `model` over `data`, summed per sequential
/// batch and normalised by the example count at the end.
fn mean_squared_error<B: Backend>(
    model:      &ConvModel<B>,
    data:       &TensorPair<B>,
    batch_size: usize,
) -> f64 {
    let mut sum = 0.0;
    for range in sequential_batches(data.len(), batch_size) {
        let batch = data.range(range);
        let predictions = model.forward(batch.inputs).flatten(0, 1);
        sum += sum_squared_error(predictions, batch.outputs);
    }
    sum / data.len().max(1) as f64
}

fn sum_squared_error<B: Backend>(predictions: Tensor<B, 1>, targets: Tensor<B, 1>) -> f64 {
    MseLoss::new()
        .forward(predictions, targets, Reduction::Sum)
        .into_scalar()
        .elem::<f64>()
}

/// Mean squared error of always predicting the targets' own mean —
/// the reference point a model has to beat for a positive pseudo-R².
pub fn baseline_error<B: Backend>(targets: &Tensor<B, 1>) -> f64 {
    let n = targets.dims()[0];
    if n == 0 {
        return f64::NAN;
    }
    let mean = targets.clone().mean().into_scalar().elem::<f64>();
    let constant = targets.ones_like().mul_scalar(mean);
    MseLoss::new()
        .forward(constant, targets.clone(), Reduction::Sum)
        .into_scalar()
        .elem::<f64>()
        / n as f64
}

/// `1 - eval_loss / baseline`: 0 means no better than predicting the
/// mean, 1 means a perfect fit.
pub fn pseudo_r2(eval_loss: f64, baseline: f64) -> f64 {
    1.0 - eval_loss / baseline
}

fn mean_of(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn fmt_series(values: impl Iterator<Item = f64>) -> String {
    values
        .map(|v| format!("{v:.3}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_f32_vec<B: Backend>(tensor: Tensor<B, 1>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("cannot read tensor data back to the host: {e:?}"))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::ConvModelConfig;

    fn test_config(partitions: usize, epochs: usize, loss_sampling: bool) -> TrainConfig {
        TrainConfig {
            model_dir: String::new(),
            partitions,
            batch_size: 4,
            batch_size_annealing: 1.0,
            epochs,
            learning_rate: 1e-3,
            loss_sampling,
        }
    }

    /// Deterministic paired data: distinct nonzero targets, inputs
    /// long enough for the conv stack to emit one scalar per example.
    fn synthetic_pair(n: usize) -> TensorPair<HostBackend> {
        let device = Default::default();
        let input_values: Vec<f32> = (0..n * 5 * 91)
            .map(|i| ((i % 13) as f32 - 6.0) * 0.05)
            .collect();
        let output_values: Vec<f32> = (0..n).map(|i| 0.5 + (i % 7) as f32 * 0.25).collect();
        TensorPair::new(
            Tensor::<HostBackend, 1>::from_floats(input_values.as_slice(), &device)
                .reshape([n, 5, 91]),
            Tensor::<HostBackend, 1>::from_floats(output_values.as_slice(), &device),
        )
    }

    fn seed_models(k: usize) -> Vec<ConvModel<TrainingBackend>> {
        let device = Default::default();
        let base: ConvModel<TrainingBackend> = ConvModelConfig::new().init(&device);
        vec![base; k]
    }

    #[test]
    fn test_pseudo_r2_is_zero_at_the_baseline() {
        let device = Default::default();
        let targets = Tensor::<HostBackend, 1>::from_floats([1.0, 2.0, 3.0, 6.0], &device);
        let baseline = baseline_error(&targets);

        // A model that predicts the target mean exactly scores the
        // baseline error, and therefore an R² of exactly zero.
        let mean = targets.clone().mean().into_scalar().elem::<f64>();
        let constant = targets.ones_like().mul_scalar(mean);
        let eval_loss = sum_squared_error(constant, targets) / 4.0;

        assert!((eval_loss - baseline).abs() < 1e-9);
        assert!(pseudo_r2(eval_loss, baseline).abs() < 1e-9);
    }

    #[test]
    fn test_run_until_failure_keeps_completed_epochs() {
        // Fails while working on epoch index 3 → epochs 0..=2 survive.
        let records = run_until_failure(|epoch| {
            if epoch == 3 {
                bail!("injected failure");
            }
            Ok(epoch * 10)
        });
        assert_eq!(records, vec![0, 10, 20]);

        // Failing immediately yields nothing, but still returns.
        let none = run_until_failure(|_| -> Result<usize> { bail!("at once") });
        assert!(none.is_empty());
    }

    #[test]
    fn test_cross_validation_fills_the_loss_history() {
        let cfg    = test_config(2, 2, false);
        let data   = synthetic_pair(12);
        let models = seed_models(2);
        let optimizers: Vec<_> = models.iter().map(|_| AdamConfig::new().init()).collect();

        let (models, _optimizers, history, batch_size) =
            cross_validate(&cfg, models, optimizers, &data).unwrap();

        assert_eq!(models.len(), 2);
        assert_eq!(history.partitions(), 2);
        assert_eq!(history.epochs(), 2);
        // Annealing factor 1.0 leaves the batch size alone.
        assert_eq!(batch_size, 4);
        for fold in 0..2 {
            for epoch in 0..2 {
                let record = history.get(fold, epoch).unwrap();
                assert!(record.train.is_finite());
                assert!(record.eval.is_finite());
            }
        }
    }

    #[test]
    fn test_loss_sampling_is_sequential_on_the_first_epoch() {
        // All-zero weights make drawing undefined, so epoch 0 falls
        // back to the plain sequential slice even with weights present.
        let weights = LossWeights::zeros(10);
        let mut rng = rand::thread_rng();

        let indices = batch_indices(0, 1, 4, 10, Some(&weights), &mut rng).unwrap();
        assert_eq!(indices, BatchIndices::Sequential(4..8));

        let tail = batch_indices(0, 2, 4, 10, Some(&weights), &mut rng).unwrap();
        assert_eq!(tail, BatchIndices::Sequential(8..10));
    }

    #[test]
    fn test_loss_sampling_draws_after_the_first_epoch() {
        // Epoch 0 seeds the weights sequentially; epoch 1 then draws
        // from them. The run succeeding at all proves the weights held
        // probability mass after the seeding pass.
        let cfg    = test_config(2, 2, true);
        let data   = synthetic_pair(10);
        let models = seed_models(2);
        let optimizers: Vec<_> = models.iter().map(|_| AdamConfig::new().init()).collect();

        let (_, _, history, _) = cross_validate(&cfg, models, optimizers, &data).unwrap();
        assert_eq!(history.epochs(), 2);
    }

    #[test]
    fn test_all_data_failure_returns_partial_state() {
        // A zero batch size makes the very first all-data epoch fail:
        // no history entries, but the models come back intact.
        let cfg    = test_config(2, 1, false);
        let train  = synthetic_pair(8);
        let test   = synthetic_pair(2);
        let models = seed_models(2);
        let optimizers: Vec<_> = models.iter().map(|_| AdamConfig::new().init()).collect();

        let (models, optimizers, history) =
            train_on_all_data(&cfg, models, optimizers, train, test, 0);

        assert_eq!(models.len(), 2);
        assert_eq!(optimizers.len(), 2);
        assert_eq!(history.epochs(), 0);
    }

    #[test]
    fn test_ensemble_evaluation_reports_each_fold() {
        let data   = synthetic_pair(6);
        let models = seed_models(2);

        let (per_fold, ensemble_loss) = evaluate_ensemble(&models, &data, 3);
        assert_eq!(per_fold.len(), 2);
        assert!(ensemble_loss.is_finite());
        // Identical members: the ensemble matches each of them.
        assert!((per_fold[0] - ensemble_loss).abs() < 1e-6);
    }
}

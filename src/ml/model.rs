use burn::{
    nn::{
        conv::{Conv1d, Conv1dConfig},
        BatchNorm, BatchNormConfig,
        Dropout, DropoutConfig,
    },
    prelude::*,
    tensor::activation::leaky_relu,
};

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct ConvModelConfig {
    /// Channels in each input window
    #[config(default = 5)]
    pub in_channels: usize,
}

impl ConvModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvModel<B> {
        // Strided stack halving the temporal axis every other block,
        // dropout rising with depth, then a 1x1 projection down to a
        // single channel. An input of length 91 reduces to exactly
        // one value per example.
        let blocks = vec![
            conv_block(device, self.in_channels, 64, 3, 2, true, 0.2),
            conv_block(device, 64, 64, 3, 1, true, 0.2),
            conv_block(device, 64, 128, 3, 2, true, 0.2),
            conv_block(device, 128, 128, 3, 1, true, 0.2),
            conv_block(device, 128, 256, 3, 2, true, 0.2),
            conv_block(device, 256, 256, 3, 1, true, 0.3),
            conv_block(device, 256, 512, 3, 2, true, 0.4),
            conv_block(device, 512, 512, 3, 1, true, 0.5),
            conv_block(device, 512, 1, 1, 1, false, 0.0),
        ];
        ConvModel { blocks }
    }
}

fn conv_block<B: Backend>(
    device:      &B::Device,
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride:      usize,
    batch_norm:  bool,
    dropout:     f64,
) -> ConvBlock<B> {
    ConvBlock {
        conv: Conv1dConfig::new(in_channels, out_channels, kernel_size)
            .with_stride(stride)
            .init(device),
        norm:    batch_norm.then(|| BatchNormConfig::new(out_channels).init(device)),
        dropout: DropoutConfig::new(dropout).init(),
    }
}

/// Conv1d → optional BatchNorm → Dropout → leaky ReLU.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv:    Conv1d<B>,
    norm:    Option<BatchNorm<B, 1>>,
    dropout: Dropout,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, inputs: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.conv.forward(inputs);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None       => x,
        };
        leaky_relu(self.dropout.forward(x), 0.01)
    }
}

/// The full regression stack. One scalar per example comes out when
/// the input length matches the stride chain; the trainer flattens
/// whatever remains into a flat per-example prediction.
#[derive(Module, Debug)]
pub struct ConvModel<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
}

impl<B: Backend> ConvModel<B> {
    /// inputs: [batch, channels, len] → predictions: [batch, features]
    pub fn forward(&self, inputs: Tensor<B, 3>) -> Tensor<B, 2> {
        let mut x = inputs;
        for block in &self.blocks {
            x = block.forward(x);
        }
        let [batch, channels, len] = x.dims();
        x.reshape([batch, channels * len])
    }
}

/// Mean-prediction combination of several independently trained models.
///
/// Owns its members but adds no parameters of its own; callers wanting
/// inference semantics take `valid()` on the members first.
#[derive(Module, Debug)]
pub struct EnsembleModel<B: Backend> {
    pub models: Vec<ConvModel<B>>,
}

impl<B: Backend> EnsembleModel<B> {
    pub fn new(models: Vec<ConvModel<B>>) -> Self {
        Self { models }
    }

    pub fn into_models(self) -> Vec<ConvModel<B>> {
        self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// inputs: [batch, channels, len] → the elementwise mean of every
    /// member's prediction: [batch, features]
    pub fn forward(&self, inputs: Tensor<B, 3>) -> Tensor<B, 2> {
        let predictions = self
            .models
            .iter()
            .map(|model| model.forward(inputs.clone()))
            .collect();
        mean_prediction(predictions)
    }
}

/// Stack per-model predictions along a new trailing axis and average
/// across it. All predictions must share one [batch, features] shape.
pub fn mean_prediction<B: Backend>(predictions: Vec<Tensor<B, 2>>) -> Tensor<B, 2> {
    let stacked: Tensor<B, 3> = Tensor::stack(predictions, 2);
    stacked.mean_dim(2).squeeze(2)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    type B = burn::backend::NdArray;

    #[test]
    fn test_mean_prediction_of_constant_models() {
        let device = Default::default();

        // Two constant predictors at 2.0 and 4.0 → ensemble mean 3.0.
        let twos  = Tensor::<B, 2>::from_floats([[2.0, 2.0], [2.0, 2.0]], &device);
        let fours = Tensor::<B, 2>::from_floats([[4.0, 4.0], [4.0, 4.0]], &device);

        let mean = mean_prediction(vec![twos, fours]);
        let values = mean.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![3.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_forward_reduces_length_91_to_one_scalar() {
        let device = Default::default();
        let model: ConvModel<B> = ConvModelConfig::new().init(&device);

        let inputs = Tensor::<B, 1>::from_floats(vec![0.1f32; 2 * 5 * 91].as_slice(), &device)
            .reshape([2, 5, 91]);
        let predictions = model.forward(inputs);
        assert_eq!(predictions.dims(), [2, 1]);
    }

    #[test]
    fn test_ensemble_forward_matches_member_mean() {
        let device = Default::default();
        let base: ConvModel<B> = ConvModelConfig::new().init(&device);

        // Identical members: the ensemble must reproduce each member.
        let ensemble = EnsembleModel::new(vec![base.clone(), base.clone()]);
        let inputs = Tensor::<B, 1>::from_floats(vec![0.5f32; 5 * 91].as_slice(), &device)
            .reshape([1, 5, 91]);

        let member   = base.forward(inputs.clone()).into_data().to_vec::<f32>().unwrap();
        let combined = ensemble.forward(inputs).into_data().to_vec::<f32>().unwrap();
        for (a, b) in member.iter().zip(&combined) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}

// ============================================================
// Layer 5 — Dataset Store
// ============================================================
// Loads the paired training tensors from their fixed locations:
//
//   train_in.bin  — inputs, shape [examples, channels, len]
//   train_out.bin — targets, shape [examples]
//
// Each file is a bincode-encoded record of the tensor's shape and
// its row-major f32 values. The two files must agree on the leading
// dimension — inputs[i] pairs with outputs[i] — and a missing or
// malformed file is a hard error: unlike the model store there is
// nothing sensible to fall back to.
//
// Reference: bincode crate documentation
//            Rust Book §9 (Error Handling)

use std::{fs, path::PathBuf};

use anyhow::{bail, Context, Result};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::dataset::TensorPair;

/// On-disk layout of one tensor: shape plus row-major values.
#[derive(Debug, Serialize, Deserialize)]
struct TensorFile {
    shape: Vec<usize>,
    data:  Vec<f32>,
}

impl TensorFile {
    fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Reads the paired dataset from its two tensor files.
pub struct DatasetStore {
    inputs_path:  PathBuf,
    outputs_path: PathBuf,
}

impl DatasetStore {
    pub fn new(inputs_path: impl Into<PathBuf>, outputs_path: impl Into<PathBuf>) -> Self {
        Self {
            inputs_path:  inputs_path.into(),
            outputs_path: outputs_path.into(),
        }
    }

    /// The fixed file names, resolved against the working directory.
    pub fn from_working_dir() -> Self {
        Self::new("train_in.bin", "train_out.bin")
    }

    /// Load and validate both tensors.
    pub fn load<B: Backend>(&self, device: &B::Device) -> Result<TensorPair<B>> {
        let inputs  = read_tensor_file(&self.inputs_path)?;
        let outputs = read_tensor_file(&self.outputs_path)?;

        if inputs.shape.len() != 3 {
            bail!(
                "'{}' must hold a rank-3 tensor [examples, channels, len], found shape {:?}",
                self.inputs_path.display(),
                inputs.shape,
            );
        }
        if outputs.shape.len() != 1 {
            bail!(
                "'{}' must hold a rank-1 tensor [examples], found shape {:?}",
                self.outputs_path.display(),
                outputs.shape,
            );
        }
        if inputs.shape[0] != outputs.shape[0] {
            bail!(
                "paired tensors disagree on length: {} inputs vs {} outputs",
                inputs.shape[0],
                outputs.shape[0],
            );
        }
        for file in [&inputs, &outputs] {
            if file.data.len() != file.element_count() {
                bail!(
                    "tensor file carries {} values but its shape {:?} needs {}",
                    file.data.len(),
                    file.shape,
                    file.element_count(),
                );
            }
        }

        let input_tensor = Tensor::<B, 1>::from_floats(inputs.data.as_slice(), device)
            .reshape([inputs.shape[0], inputs.shape[1], inputs.shape[2]]);
        let output_tensor = Tensor::<B, 1>::from_floats(outputs.data.as_slice(), device);

        Ok(TensorPair::new(input_tensor, output_tensor))
    }
}

fn read_tensor_file(path: &PathBuf) -> Result<TensorFile> {
    let bytes = fs::read(path)
        .with_context(|| format!("Cannot read tensor file '{}'", path.display()))?;
    bincode::deserialize(&bytes)
        .with_context(|| format!("Cannot decode tensor file '{}'", path.display()))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    type B = burn::backend::NdArray;

    fn write_tensor(path: &PathBuf, shape: Vec<usize>, data: Vec<f32>) {
        let bytes = bincode::serialize(&TensorFile { shape, data }).unwrap();
        fs::write(path, bytes).unwrap();
    }

    fn temp_paths(tag: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir();
        (
            dir.join(format!("train_in-{tag}-{}.bin", std::process::id())),
            dir.join(format!("train_out-{tag}-{}.bin", std::process::id())),
        )
    }

    #[test]
    fn test_roundtrip_through_the_store() {
        let (in_path, out_path) = temp_paths("roundtrip");
        write_tensor(&in_path, vec![2, 1, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        write_tensor(&out_path, vec![2], vec![10.0, 20.0]);

        let device = Default::default();
        let pair = DatasetStore::new(&in_path, &out_path)
            .load::<B>(&device)
            .unwrap();

        assert_eq!(pair.len(), 2);
        assert_eq!(pair.inputs.dims(), [2, 1, 3]);
        let outputs = pair.outputs.into_data().to_vec::<f32>().unwrap();
        assert_eq!(outputs, vec![10.0, 20.0]);

        fs::remove_file(&in_path).ok();
        fs::remove_file(&out_path).ok();
    }

    #[test]
    fn test_mismatched_lengths_are_rejected() {
        let (in_path, out_path) = temp_paths("mismatch");
        write_tensor(&in_path, vec![2, 1, 1], vec![1.0, 2.0]);
        write_tensor(&out_path, vec![3], vec![1.0, 2.0, 3.0]);

        let device = Default::default();
        let result = DatasetStore::new(&in_path, &out_path).load::<B>(&device);
        assert!(result.is_err());

        fs::remove_file(&in_path).ok();
        fs::remove_file(&out_path).ok();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let device = Default::default();
        let result = DatasetStore::new("no-such-in.bin", "no-such-out.bin").load::<B>(&device);
        assert!(result.is_err());
    }
}

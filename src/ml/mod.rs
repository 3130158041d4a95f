// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn framework code lives here. The data layer hands over
// plain `Batch` values; this layer turns them into tensors.
//
//   model.rs     — XrayCnn: conv blocks → pooled features → 2 logits
//   tensors.rs   — Burn Batcher: Vec<Sample> → image/target tensors
//   trainer.rs   — epoch loop, Adam, early stopping, checkpoints
//   evaluator.rs — test-split pass → EvaluationReport
//
// Backends:
//   default        NdArray<f32> on the CPU
//   --features wgpu  Wgpu on the GPU
//   training wraps either one in Autodiff.
//
// Reference: Burn Book §3 (Building Blocks), §5 (Training)

/// Convolutional NORMAL / PNEUMONIA classifier
pub mod model;

/// Batch → tensor conversion
pub mod tensors;

/// Training loop with validation, early stopping and checkpointing
pub mod trainer;

/// Test-split evaluation of a model artifact
pub mod evaluator;

#[cfg(not(feature = "wgpu"))]
pub type InferenceBackend = burn::backend::NdArray<f32>;
#[cfg(feature = "wgpu")]
pub type InferenceBackend = burn::backend::Wgpu;

pub type TrainingBackend = burn::backend::Autodiff<InferenceBackend>;

pub type Device = <InferenceBackend as burn::prelude::Backend>::Device;

pub fn default_device() -> Device {
    Device::default()
}

#[cfg(test)]
pub(crate) type TestBackend = burn::backend::NdArray<f32>;
#[cfg(test)]
pub(crate) type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;

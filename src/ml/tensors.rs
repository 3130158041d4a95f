// ============================================================
// Layer 5 — Tensor Batcher
// ============================================================
// Bridges the framework-free data layer and Burn: stacks the
// Samples of one data::batcher::Batch into tensors.
//
//   Vec<Sample>  (pixels: Vec<f32>, label)
//       │
//       ▼
//   images  [batch, 1, height, width]   Float
//   targets [batch]                     Int  (0 = NORMAL, 1 = PNEUMONIA)

use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::data::batcher::Sample;

#[derive(Debug, Clone)]
pub struct XrayTensorBatch<B: Backend> {
    pub images:  Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// Implements Burn's Batcher for decoded X-ray samples.
#[derive(Debug, Clone)]
pub struct XrayBatcher<B: Backend> {
    device: B::Device,
    width:  usize,
    height: usize,
}

impl<B: Backend> XrayBatcher<B> {
    /// `target_size` is (width, height), as produced by the data layer.
    pub fn new(device: B::Device, target_size: (u32, u32)) -> Self {
        Self { device, width: target_size.0 as usize, height: target_size.1 as usize }
    }
}

impl<B: Backend> Batcher<Sample, XrayTensorBatch<B>> for XrayBatcher<B> {
    fn batch(&self, items: Vec<Sample>) -> XrayTensorBatch<B> {
        let n = items.len();
        let mut pixels  = Vec::with_capacity(n * self.width * self.height);
        let mut targets = Vec::with_capacity(n);
        for sample in items {
            debug_assert_eq!(sample.pixels.len(), self.width * self.height);
            pixels.extend_from_slice(&sample.pixels);
            targets.push(sample.label.index() as i64);
        }

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [n, 1, self.height, self.width]),
            &self.device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(targets, [n]), &self.device);
        XrayTensorBatch { images, targets }
    }
}

// ============================================================
// Layer 5 — Chest X-ray CNN
// ============================================================
// A small convolutional classifier over single-channel images.
//
//   input [batch, 1, H, W]
//     │
//     ├─ ConvBlock × num_blocks
//     │    conv 3×3 (same padding) → ReLU → max-pool 2×2
//     │    channels: base, 2·base, 4·base, ...
//     │
//     ├─ adaptive average pool → [batch, C, 1, 1] → flatten
//     ├─ Linear(C → hidden) → ReLU → Dropout
//     └─ Linear(hidden → 2)  logits for [NORMAL, PNEUMONIA]
//
// Each block halves H and W, so both must be at least
// 2^num_blocks (see XrayCnnConfig::min_image_side).

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig,
        Linear, LinearConfig,
        PaddingConfig2d,
    },
    prelude::*,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::activation::{relu, softmax},
};

use crate::domain::error::{PipelineError, Stage};
use crate::domain::record::Label;

/// Architecture id stored in artifact metadata.
pub const ARCHITECTURE: &str = "xray-cnn-v1";

// Config derive already provides Clone + serde; do not derive them again.
#[derive(Config, Debug)]
pub struct XrayCnnConfig {
    #[config(default = 8)]
    pub base_channels: usize,
    #[config(default = 3)]
    pub num_blocks:    usize,
    #[config(default = 64)]
    pub hidden:        usize,
    #[config(default = 0.3)]
    pub dropout:       f64,
}

impl XrayCnnConfig {
    /// Smallest width/height the network accepts.
    pub fn min_image_side(&self) -> u32 {
        1u32 << self.num_blocks.min(31)
    }

    pub fn output_channels(&self) -> usize {
        self.base_channels << self.num_blocks.saturating_sub(1)
    }

    pub fn validate(&self) -> crate::domain::error::Result<()> {
        if self.base_channels == 0 || self.num_blocks == 0 || self.hidden == 0 {
            return Err(PipelineError::Config(
                "model channels, blocks and hidden size must be positive".into(),
            ));
        }
        if self.num_blocks > 8 {
            return Err(PipelineError::Config(format!(
                "at most 8 conv blocks supported, got {}",
                self.num_blocks
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(PipelineError::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> XrayCnn<B> {
        let blocks = (0..self.num_blocks)
            .map(|i| {
                let in_ch  = if i == 0 { 1 } else { self.base_channels << (i - 1) };
                let out_ch = self.base_channels << i;
                ConvBlock {
                    conv: Conv2dConfig::new([in_ch, out_ch], [3, 3])
                        .with_padding(PaddingConfig2d::Same)
                        .init(device),
                    pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
                }
            })
            .collect();

        XrayCnn {
            blocks,
            gap:     AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1:     LinearConfig::new(self.output_channels(), self.hidden).init(device),
            fc2:     LinearConfig::new(self.hidden, Label::COUNT).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }

    /// Rebuild a model from bytes produced by [`XrayCnn::to_bytes`].
    pub fn load_bytes<B: Backend>(&self, bytes: Vec<u8>, device: &B::Device) -> crate::domain::error::Result<XrayCnn<B>> {
        let record = BinBytesRecorder::<FullPrecisionSettings>::default()
            .load(bytes, device)
            .map_err(|e| PipelineError::fatal(Stage::Evaluation, ARCHITECTURE, format!("cannot decode weights: {e}")))?;
        Ok(self.init::<B>(device).load_record(record))
    }
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pool.forward(relu(self.conv.forward(x)))
    }
}

#[derive(Module, Debug)]
pub struct XrayCnn<B: Backend> {
    pub blocks:  Vec<ConvBlock<B>>,
    pub gap:     AdaptiveAvgPool2d,
    pub fc1:     Linear<B>,
    pub fc2:     Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> XrayCnn<B> {
    /// images: [batch, 1, H, W] → logits: [batch, 2]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x: Tensor<B, 2> = self.gap.forward(x).flatten(1, 3);
        let x = self.dropout.forward(relu(self.fc1.forward(x)));
        self.fc2.forward(x)
    }

    /// Cross entropy, optionally weighted per class.
    /// Returns (mean loss, logits).
    pub fn forward_loss(
        &self,
        images:        Tensor<B, 4>,
        targets:       Tensor<B, 1, Int>,
        class_weights: Option<[f32; Label::COUNT]>,
    ) -> (Tensor<B, 1>, Tensor<B, 2>) {
        let logits = self.forward(images);
        let ce = CrossEntropyLossConfig::new()
            .with_weights(class_weights.map(|w| w.to_vec()))
            .init(&logits.device());
        (ce.forward(logits.clone(), targets), logits)
    }

    /// P(PNEUMONIA) for every image in the batch.
    pub fn predict_positive(&self, images: Tensor<B, 4>) -> Vec<f64> {
        positive_probabilities(self.forward(images))
    }

    /// Serialize all parameters at full precision.
    pub fn to_bytes(&self) -> crate::domain::error::Result<Vec<u8>> {
        BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(self.clone().into_record(), ())
            .map_err(|e| PipelineError::fatal(Stage::Training, ARCHITECTURE, format!("cannot encode weights: {e}")))
    }
}

/// Softmax over logits [batch, 2], returning the PNEUMONIA column.
pub fn positive_probabilities<B: Backend>(logits: Tensor<B, 2>) -> Vec<f64> {
    let [batch, _] = logits.dims();
    let p = Label::Pneumonia.index();
    softmax(logits, 1)
        .slice([0..batch, p..p + 1])
        .into_data()
        .iter::<f32>()
        .map(f64::from)
        .collect()
}

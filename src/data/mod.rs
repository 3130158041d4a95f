// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from a Kaggle archive to batches of pixels:
//
//   Kaggle zip ──▶ DatasetAcquirer   fetch, extract, verify
//                      │
//                      ▼
//   <root>/{train,val,test}/{NORMAL,PNEUMONIA}/*.jpeg
//                      │
//                      ▼
//                 MetadataCatalog    path → (split, label)
//                      │
//                      ▼
//                 ImageLoader        decode, grayscale, resize, [0,1]
//                      │
//                      ▼
//                 Augmentation       train only, seeded per epoch
//                      │
//                      ▼
//                 BatchSequence      bounded prefetch on a worker thread
//
// Tensors are built in Layer 5 (ml::tensors); nothing here
// depends on burn.

/// Fetch, extract and verify the dataset
pub mod acquirer;

/// Directory scan into a DatasetCatalog
pub mod catalog;

/// Decode and normalise one image file
pub mod image_loader;

/// Random flips, rotations and brightness jitter
pub mod augment;

/// Per-split batch sequences with background prefetch
pub mod batcher;

#[cfg(test)]
pub(crate) mod test_support;

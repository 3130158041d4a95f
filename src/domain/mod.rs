// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs, enums and traits describing the pipeline:
// what an image record, a catalog, an artifact and a report ARE.
//
// Rules for this layer:
//   - NO Burn framework types
//   - NO file I/O or network calls
//   - Only plain data, invariants and traits

// Split / Label / ImageRecord
pub mod record;

// DatasetCatalog with derived counts, imbalance and class weights
pub mod catalog;

// ModelArtifact and its metadata
pub mod artifact;

// TrainingHistory and EvaluationReport
pub mod report;

// Error taxonomy shared by every layer below the CLI
pub mod error;

// Cooperative cancellation flag
pub mod cancel;

// Seams implemented by the infra layer
pub mod traits;

// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Each use case coordinates the lower layers for one CLI
// command. No model math and no printing here; results are
// returned to Layer 1, which decides how to show them.
//
//   download_use_case — inspect or fetch + verify the dataset
//   check_use_case    — catalog + first batch of every split
//   train_use_case    — ensure → catalog → batches → train → evaluate
//   evaluate_use_case — score a stored artifact on the test split

pub mod download_use_case;

pub mod check_use_case;

pub mod train_use_case;

pub mod evaluate_use_case;

//! Ledger Anchoring
//!
//! Commits batches of queued leaf hashes to an external ledger through a
//! crash-safe two-phase cycle, and keeps the resulting anchor records.

pub mod cycle;
pub mod ledger;
pub mod record;
pub mod scheduler;

pub use cycle::{AnchorCycle, AnchorStats, CycleOutcome, RefreshReport};
pub use ledger::{HttpLedgerClient, Ledger, MockLedger, Submission, TxStatus};
pub use record::{locate_leaf, AnchorRecord, PendingAnchor, RecordSummary, TxConfirmation};
pub use scheduler::run_scheduler;

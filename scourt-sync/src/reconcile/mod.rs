//! Reconciliation engine
//!
//! Maps parsed portal documents onto the domain store. Every write path is
//! idempotent: hearings dedup on a content hash, deadlines on (case, type,
//! trigger date), parties on (case, name, type), so a retried sync never
//! duplicates rows. The portal is authoritative for additions and updates
//! only; reconciliation never deletes local rows.

pub mod changes;
pub mod deadlines;
pub mod hearings;
pub mod parties;

pub use changes::{detect_changes, CaseUpdate, SnapshotData, UpdateType};
pub use deadlines::{register_deadlines, DeadlineReport};
pub use hearings::{sync_hearings, HearingReport};
pub use parties::{sync_parties, sync_related_cases, PartyReport};

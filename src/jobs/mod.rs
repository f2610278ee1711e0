//! Scheduled lifecycle jobs
//!
//! Each job holds a named lease for the length of its run, so overlapping
//! invocations are skipped. Items within a run are processed concurrently
//! up to `job_concurrency`.

mod archival;
mod grace_period;
mod lease;
mod ledger_cleanup;
mod scheduler;

pub use archival::{ARCHIVAL_JOB, ArchivalJob, ArchivalReport};
pub use grace_period::{GRACE_PERIOD_JOB, GracePeriodJob, GracePeriodReport};
pub use lease::{InMemoryLeaseStore, JobLeaseStore, JobOutcome, run_exclusive};
pub use ledger_cleanup::{LEDGER_CLEANUP_JOB, LedgerCleanupJob};
pub use scheduler::{JobScheduler, RunningScheduler, ScheduledJob};

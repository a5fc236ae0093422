//! The asynchronous job pipeline: submission, claim-and-process workers, and
//! the reconciliation sweep, all coordinated through compare-and-set writes on
//! the job record.

pub mod controller;
pub mod error;
pub mod retry;
pub mod sweep;
pub mod telemetry;
pub mod worker;

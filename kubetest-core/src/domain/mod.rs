//! Core domain types
//!
//! A `JobSpec` is the logical request for one suite run. Submitting it
//! creates a `WorkloadUnit` on the cluster, whose terminal state becomes a
//! `JobResult`. `JobRecord` is the reporting view History builds from units.

pub mod job;
pub mod record;
pub mod workload;

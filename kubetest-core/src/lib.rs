//! Kubetest Core
//!
//! Core types shared by every kubetest component.
//!
//! This crate contains:
//! - Domain types: jobs, workload units, results and history records
//! - DTOs: the job descriptor published for in-cluster processes
//! - Labels: selection labels and selectors used for discovery
//! - Registry: the statically built table of test and benchmark suites
//!
//! Nothing in here performs I/O. Talking to a cluster lives in
//! `kubetest-cluster`, orchestration in `kubetest-runner`.

pub mod domain;
pub mod dto;
pub mod error;
pub mod labels;
pub mod registry;

pub use error::{DomainError, Result};

//! Batch resume analysis for closed job postings.
//!
//! `controller` is the public surface. A run takes the per-job lease from
//! `lock`, fans applicants out to `worker`s under the `orchestrator`, and
//! persists terminal results through the `aggregator` into `store`.

pub mod aggregator;
pub mod classify;
pub mod collaborators;
pub mod controller;
pub mod inference;
pub mod lease;
pub mod lock;
pub mod orchestrator;
pub mod prompts;
pub mod scoring;
pub mod store;
pub mod worker;

#[cfg(test)]
pub mod testing;

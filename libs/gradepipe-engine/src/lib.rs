//! Asynchronous code-evaluation pipeline.
//!
//! Two scheduling domains share one execution path: the in-process
//! [`queue::EphemeralQueue`] for low-latency single-submission checks,
//! and the persisted [`tasks::DurableQueue`] for whole-exam bulk
//! grading. Both run submissions through a [`sandbox::SandboxExecutor`]
//! per test case and score the pass counts with the banding policy in
//! `gradepipe_common::scoring`.

pub mod evaluator;
pub mod queue;
pub mod sandbox;
pub mod status;
pub mod storage;
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_support;

//! Webhook delivery queue: a batch runner that posts queued HTTP calls to
//! their endpoints, retrying temporary failures with per-job backoff.
//!
//! The moving parts:
//! - [`store`]: the [`store::JobStore`] contract plus the file-backed and
//!   in-memory implementations, with per-job locks scoped to a session.
//! - [`policy`]: workability, backoff eligibility and outcome
//!   classification.
//! - [`executor`]: one HTTP delivery attempt.
//! - [`runner`]: the bounded worker pool tying it all together.

pub mod cli;
pub mod clock;
pub mod errors;
pub mod executor;
pub mod models;
pub mod policy;
pub mod runner;
pub mod store;

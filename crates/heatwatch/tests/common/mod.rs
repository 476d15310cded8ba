//! Shared test utilities for heatwatch integration tests.
//!
//! - `FakeBackend` / `FixedProbe`: scripted collaborators
//! - `SignalLog`: records everything a context's view layer would see
//! - helpers for building jobs and sessions

pub mod fakes;
pub mod harness;

pub use fakes::{FakeBackend, FixedProbe};
pub use harness::*;

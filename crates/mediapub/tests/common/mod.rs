//! Shared test utilities for mediapub integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring a controller to an in-memory database
//! - Recording doubles for the listener and site publishers
//! - Canned job runners

pub mod harness;
pub mod runners;

pub use harness::{Outcome, RecordingListener, RecordingPublisher, TestHarness};
pub use runners::*;

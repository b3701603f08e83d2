//! Core types shared by every phase of the update pipeline.
//!
//! The error taxonomy lives here so that each component module can return
//! strongly-typed failures without depending on the orchestrator.

pub mod error;

pub use error::{PathViolation, UpdateError};

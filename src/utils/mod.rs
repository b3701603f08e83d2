//! Cross-platform utilities shared by the pipeline components.

pub mod checksum;
pub mod fs;

// Public library interface for IsoForge-rs
// The CLI and the debug-tree tool both build on these modules

pub mod build;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod media;
pub mod project;

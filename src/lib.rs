// Bedrock library
// Framework-aware chunk partitioning, deterministic asset naming and a
// generation-bounded persistent build cache

pub mod cache;
pub mod cli;
pub mod core;
pub mod infrastructure;
pub mod utils;

pub use crate::cache::{CacheController, CachePolicy};
pub use crate::core::{BedrockBuildService, BuildConfig, BuildMode, BuildResult, BuildService};
pub use crate::utils::{BedrockError, Result};

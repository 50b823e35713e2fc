use crate::core::models::*;
use crate::utils::Result;
use async_trait::async_trait;
use std::path::Path;

/// File system operations interface
#[async_trait]
pub trait FileSystemService: Send + Sync {
    /// Recursively collect module files, skipping `skip_dirs`, hidden
    /// directories and nested `node_modules`
    async fn scan_directory(&self, path: &Path, skip_dirs: &[&Path]) -> Result<ProjectStructure>;
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>>;
    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<()>;
    async fn create_directory(&self, path: &Path) -> Result<()>;
    /// Remove everything inside `path`, keeping the directory itself
    async fn clean_directory(&self, path: &Path) -> Result<()>;
}

/// Script transpile/minify stage: rendered chunk source in, final bytes out
#[async_trait]
pub trait JsProcessor: Send + Sync {
    async fn process_chunk(&self, chunk_name: &str, source: &str) -> Result<String>;
    /// Identifies the stage configuration in cache fingerprints
    fn cache_identity(&self) -> String;
}

/// Stylesheet transform/minify stage with the same byte-in/byte-out contract
#[async_trait]
pub trait CssProcessor: Send + Sync {
    async fn process_stylesheet(&self, chunk_name: &str, source: &str) -> Result<String>;
    fn cache_identity(&self) -> String;
}

/// Produces the HTML document that loads the emitted assets
#[async_trait]
pub trait HtmlShell: Send + Sync {
    async fn render(&self, assets: &[EmittedAsset]) -> Result<String>;
}

/// Durable key-value backend behind the cache controller
pub trait CacheStorage: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn store(&self, key: &str, bytes: &[u8]) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
    fn entry_count(&self) -> usize;
    fn size_on_disk(&self) -> u64;
}

/// Build service interface
#[async_trait]
pub trait BuildService: Send {
    async fn build(&mut self, config: &BuildConfig) -> Result<BuildResult>;
    /// Incremental rebuild; emits hot-update patches in development
    async fn rebuild(&mut self, config: &BuildConfig) -> Result<BuildResult>;
}

use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

pub struct Logger;

impl Logger {
    /// Install the global subscriber. `RUST_LOG` wins over the default filter.
    pub fn init() {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("bedrock=info"));

        // A second init (tests, embedding) is not an error worth surfacing
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }

    pub fn build_start(root: &Path, outdir: &Path, mode: &str) {
        info!("🔨 Bedrock - {} build", mode);
        info!("═══════════════════════════════════════");
        info!("📁 Input: {}", root.display());
        info!("📦 Output: {}", outdir.display());
    }

    pub fn closure_computed(seeds: &[String], paths: usize) {
        info!(
            "🧱 Framework closure: {} package directories from [{}]",
            paths,
            seeds.join(", ")
        );
    }

    pub fn closure_skipped() {
        info!("⚡ Development mode - framework chunk grouping disabled");
    }

    pub fn package_skipped(name: &str, reason: &str) {
        debug!("⏭️  Skipping package {}: {}", name, reason);
    }

    pub fn chunk_emitted(chunk: &str, file_name: &str, size: usize, cached: bool) {
        debug!(
            "📦 {} -> {} ({} bytes{})",
            chunk,
            file_name,
            size,
            if cached { ", cached" } else { "" }
        );
    }

    pub fn build_complete(
        modules: usize,
        assets: usize,
        cache_hits: usize,
        build_time: std::time::Duration,
        outdir: &Path,
    ) {
        info!("");
        info!("📊 Build Statistics:");
        info!("  • Modules partitioned: {}", modules);
        info!("  • Assets emitted: {}", assets);
        info!("  • Cache hits: {}", cache_hits);
        info!("  • Build time: {:.2?}", build_time);
        info!("  • Output directory: {}", outdir.display());
        info!("✅ Build completed successfully!");
    }

    pub fn info(msg: &str) {
        info!("{}", msg);
    }

    pub fn debug(msg: &str) {
        debug!("{}", msg);
    }

    pub fn error(msg: &str) {
        error!("❌ {}", msg);
    }

    pub fn warn(msg: &str) {
        warn!("⚠️  {}", msg);
    }
}

pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    pub fn start(name: &str) -> Self {
        debug!("⏱️  Starting: {}", name);
        Self {
            start: Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!("⏱️  Completed: {} in {:.2?}", self.name, self.elapsed());
    }
}

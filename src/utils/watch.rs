// Watch mode
// Monitors source changes and triggers incremental rebuilds

use crate::core::interfaces::BuildService;
use crate::core::models::BuildConfig;
use crate::utils::{BedrockError, Logger, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub watch_paths: Vec<PathBuf>,
    pub debounce_ms: u64,
    pub clear_console: bool,
}

impl WatchConfig {
    /// Watch the source directory plus the project config file
    pub fn for_build(config: &BuildConfig) -> Self {
        Self {
            watch_paths: vec![
                config.entry.clone(),
                config.root.join(crate::utils::CONFIG_FILE),
            ],
            ..Default::default()
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            watch_paths: vec![PathBuf::from("src")],
            debounce_ms: 100,
            clear_console: false,
        }
    }
}

/// File watcher that rebuilds on change, emitting hot updates in development
pub struct BedrockWatcher {
    config: WatchConfig,
    build_config: BuildConfig,
}

impl BedrockWatcher {
    pub fn new(config: WatchConfig, build_config: BuildConfig) -> Self {
        Self {
            config,
            build_config,
        }
    }

    /// Build once, then rebuild after every debounced batch of changes
    /// until Ctrl+C
    pub async fn watch<B: BuildService>(&self, build_service: &mut B) -> Result<()> {
        Logger::info("👀 Watch mode started - monitoring for changes...");
        Logger::info(&format!(
            "   Watching: {}",
            self.config
                .watch_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ));
        Logger::info("   Press Ctrl+C to stop");

        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| BedrockError::build(format!("Failed to create watcher: {}", e)))?;

        for path in &self.config.watch_paths {
            if path.exists() {
                let mode = if path.is_dir() {
                    RecursiveMode::Recursive
                } else {
                    RecursiveMode::NonRecursive
                };
                watcher.watch(path, mode).map_err(|e| {
                    BedrockError::build(format!("Failed to watch {}: {}", path.display(), e))
                })?;
            }
        }

        Logger::info("🔨 Initial build...");
        if let Err(e) = build_service.build(&self.build_config).await {
            Logger::error(&format!("Initial build failed: {}", e));
        }

        let mut changed_files = HashSet::new();
        let mut last_change = Instant::now();
        let debounce = Duration::from_millis(self.config.debounce_ms);
        let mut tick = tokio::time::interval(Duration::from_millis(50));

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    Logger::info("👋 Stopping watch mode...");
                    break;
                }
                event = rx.recv() => {
                    let Some(event) = event else {
                        Logger::warn("Watch channel disconnected");
                        break;
                    };
                    if self.should_ignore_event(&event) {
                        continue;
                    }
                    for path in event.paths {
                        if is_source_file(&path) {
                            Logger::debug(&format!("Changed: {}", path.display()));
                            changed_files.insert(path);
                            last_change = Instant::now();
                        }
                    }
                }
                _ = tick.tick() => {
                    if !changed_files.is_empty() && last_change.elapsed() >= debounce {
                        self.trigger_rebuild(&changed_files, build_service).await;
                        changed_files.clear();
                    }
                }
            }
        }

        Ok(())
    }

    async fn trigger_rebuild<B: BuildService>(
        &self,
        changed_files: &HashSet<PathBuf>,
        build_service: &mut B,
    ) {
        if self.config.clear_console {
            print!("\x1B[2J\x1B[1;1H");
        }

        Logger::info(&format!("🔄 Rebuilding... ({} files changed)", changed_files.len()));
        let start = Instant::now();

        match build_service.rebuild(&self.build_config).await {
            Ok(result) => Logger::info(&format!(
                "✅ Rebuild complete in {:.0}ms ({} assets, {} hot updates)",
                start.elapsed().as_millis(),
                result.assets.len(),
                result.hot_updates.len()
            )),
            Err(e) => Logger::error(&format!("Rebuild failed: {}", e)),
        }
    }

    /// Access events, build output and cache writes never trigger a rebuild
    fn should_ignore_event(&self, event: &Event) -> bool {
        match &event.kind {
            EventKind::Access(_) | EventKind::Other => true,
            _ => event.paths.iter().all(|p| {
                p.starts_with(&self.build_config.outdir)
                    || p.starts_with(&self.build_config.cache_dir)
                    || p.components().any(|c| c.as_os_str() == ".git")
                    || is_editor_temp(p)
            }),
        }
    }
}

fn is_editor_temp(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    name.ends_with('~') || name.ends_with(".swp") || name.ends_with(".tmp")
}

fn is_source_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" | "css" | "wasm" | "json" | "html")
    )
}

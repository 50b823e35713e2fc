use crate::cache::{CacheController, CachePolicy};
use crate::core::{interfaces::*, models::*, services::*};
use crate::infrastructure::{
    compute_framework_closure, ChunkPartitioner, FrameworkChunkPredicate, LightningCssProcessor,
    PackageResolver, PartitionConfig, PassthroughJsProcessor, TemplateHtmlShell,
    TokioFileSystemService,
};
use crate::utils::{BedrockWatcher, CliOverrides, ConfigLoader, Logger, Result, WatchConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "bedrock")]
#[command(about = "Bedrock - framework-aware chunking with deterministic asset names")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the project once
    Build {
        /// Root directory
        #[arg(short, long, default_value = ".")]
        root: String,
        /// Output directory (overrides the config file)
        #[arg(short, long)]
        outdir: Option<String>,
        /// development, production or analyze (default: from NODE_ENV/ANALYZE)
        #[arg(short, long)]
        mode: Option<String>,
        /// Split non-framework chunks above this size in bytes
        #[arg(long)]
        max_chunk_size: Option<usize>,
        /// Skip the persistent cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Build, then rebuild on change with hot updates
    Watch {
        #[arg(short, long, default_value = ".")]
        root: String,
        #[arg(short, long)]
        mode: Option<String>,
        /// Clear the terminal before each rebuild
        #[arg(long)]
        clear: bool,
    },
    /// Print the framework dependency closure
    Closure {
        #[arg(short, long, default_value = ".")]
        root: String,
        /// Seed packages (default: from config)
        #[arg(short, long, value_delimiter = ',')]
        packages: Option<Vec<String>>,
    },
    /// Print the chunk a module path lands in for a production build
    Classify {
        #[arg(short, long, default_value = ".")]
        root: String,
        /// Module path, relative to the root or absolute
        path: PathBuf,
    },
    /// Inspect or clear the persistent cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
        #[arg(short, long, default_value = ".", global = true)]
        root: String,
    },
    /// Show bundler information
    Info,
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Show entry counts and size on disk
    Stats,
    /// Remove every cached entry
    Clear,
}

pub struct CliHandler;

impl CliHandler {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self) -> Result<()> {
        Logger::init();

        let cli = Cli::parse();

        match cli.command {
            Commands::Build {
                root,
                outdir,
                mode,
                max_chunk_size,
                no_cache,
            } => {
                let overrides = CliOverrides {
                    mode,
                    outdir,
                    max_chunk_size,
                    no_cache,
                    ..Default::default()
                };
                self.handle_build_command(&root, overrides).await
            }
            Commands::Watch { root, mode, clear } => {
                let overrides = CliOverrides {
                    mode,
                    ..Default::default()
                };
                self.handle_watch_command(&root, overrides, clear).await
            }
            Commands::Closure { root, packages } => {
                self.handle_closure_command(&root, packages).await
            }
            Commands::Classify { root, path } => self.handle_classify_command(&root, path).await,
            Commands::Cache { action, root } => self.handle_cache_command(&root, action).await,
            Commands::Info => self.handle_info_command().await,
        }
    }

    fn build_service(config: &BuildConfig) -> BedrockBuildService {
        let fs_service: Arc<dyn FileSystemService> = Arc::new(TokioFileSystemService);
        let js_processor: Arc<dyn JsProcessor> = Arc::new(PassthroughJsProcessor::new());
        let css_processor: Arc<dyn CssProcessor> =
            Arc::new(LightningCssProcessor::new(!config.mode.is_development()));
        let html_shell: Arc<dyn HtmlShell> = Arc::new(TemplateHtmlShell::new(
            config.template.clone(),
            &config.public_path,
        ));

        BedrockBuildService::new(fs_service, js_processor, css_processor).with_html_shell(html_shell)
    }

    async fn handle_build_command(&self, root: &str, overrides: CliOverrides) -> Result<()> {
        let config = ConfigLoader::load(PathBuf::from(root), overrides)?;
        let mut build_service = Self::build_service(&config);

        let result = build_service.build(&config).await?;
        for warning in &result.warnings {
            Logger::warn(warning);
        }

        Ok(())
    }

    async fn handle_watch_command(
        &self,
        root: &str,
        overrides: CliOverrides,
        clear_console: bool,
    ) -> Result<()> {
        let config = ConfigLoader::load(PathBuf::from(root), overrides)?;
        let mut build_service = Self::build_service(&config);

        let watch_config = WatchConfig {
            clear_console,
            ..WatchConfig::for_build(&config)
        };
        let watcher = BedrockWatcher::new(watch_config, config);
        watcher.watch(&mut build_service).await
    }

    async fn handle_closure_command(&self, root: &str, packages: Option<Vec<String>>) -> Result<()> {
        let explicit = packages.is_some();
        let config = ConfigLoader::load(
            PathBuf::from(root),
            CliOverrides {
                mode: Some(BuildMode::Production.to_string()),
                framework_packages: packages,
                ..Default::default()
            },
        )?;

        // Seeds typed on the command line must exist; configured ones are
        // skipped when missing, as in a build
        if explicit {
            let resolver = PackageResolver::new();
            let search = [config.root.clone()];
            for package in &config.framework_packages {
                resolver
                    .resolve_descriptor(package, &search)
                    .into_result(package)?;
            }
        }

        let closure =
            compute_framework_closure(config.mode, &config.framework_packages, &config.root);
        for path in closure.iter() {
            println!("{}", path.display());
        }
        Ok(())
    }

    async fn handle_classify_command(&self, root: &str, path: PathBuf) -> Result<()> {
        let config = ConfigLoader::load(
            PathBuf::from(root),
            CliOverrides {
                mode: Some(BuildMode::Production.to_string()),
                ..Default::default()
            },
        )?;

        let path = if path.is_absolute() { path } else { config.root.join(path) };
        let path = std::fs::canonicalize(&path).unwrap_or(path);

        let closure =
            compute_framework_closure(config.mode, &config.framework_packages, &config.root);
        let partitioner = ChunkPartitioner::new(PartitionConfig::default())
            .with_framework_group(FrameworkChunkPredicate::new(closure));

        println!("{}", partitioner.classify(&path));
        Ok(())
    }

    async fn handle_cache_command(&self, root: &str, action: CacheAction) -> Result<()> {
        let config = ConfigLoader::load(PathBuf::from(root), CliOverrides::default())?;
        let cache = CacheController::open(CachePolicy::for_mode(config.mode, &config.cache_dir));

        match action {
            CacheAction::Stats => {
                let stats = cache.stats();
                tracing::info!("🗄️  Cache: {}", config.cache_dir.display());
                tracing::info!("  • Persisted entries: {}", stats.persisted_entries);
                tracing::info!("  • Size on disk: {} bytes", stats.disk_size);
            }
            CacheAction::Clear => {
                cache.clear()?;
                tracing::info!("🧹 Cleared cache at {}", config.cache_dir.display());
            }
        }
        Ok(())
    }

    async fn handle_info_command(&self) -> Result<()> {
        tracing::info!("🦀 Bedrock v{}", env!("CARGO_PKG_VERSION"));
        tracing::info!("══════════════════════════════════════");
        tracing::info!("🧱 Chunks: runtime, framework (production only), main");
        tracing::info!("🏷️  Names: [contenthash] in production, [name] in development");
        tracing::info!("🗄️  Cache: <root>/node_modules/.cache/bedrock");
        tracing::info!("⚙️  Config: bedrock.config.json, NODE_ENV, ANALYZE");
        Ok(())
    }
}

impl Default for CliHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build_flags() {
        let cli = Cli::parse_from(["bedrock", "build", "--mode", "analyze", "--no-cache"]);
        match cli.command {
            Commands::Build { mode, no_cache, root, .. } => {
                assert_eq!(mode.as_deref(), Some("analyze"));
                assert!(no_cache);
                assert_eq!(root, ".");
            }
            _ => panic!("expected build command"),
        }
    }

    #[test]
    fn test_parse_closure_packages() {
        let cli = Cli::parse_from(["bedrock", "closure", "--packages", "preact,preact-render"]);
        match cli.command {
            Commands::Closure { packages, .. } => {
                assert_eq!(packages.unwrap(), vec!["preact", "preact-render"]);
            }
            _ => panic!("expected closure command"),
        }
    }

    #[test]
    fn test_parse_watch_clear_flag() {
        let cli = Cli::parse_from(["bedrock", "watch", "--clear"]);
        match cli.command {
            Commands::Watch { clear, mode, .. } => {
                assert!(clear);
                assert_eq!(mode, None);
            }
            _ => panic!("expected watch command"),
        }

        let cli = Cli::parse_from(["bedrock", "watch"]);
        assert!(matches!(cli.command, Commands::Watch { clear: false, .. }));
    }
}

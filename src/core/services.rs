use crate::cache::{CacheController, CachePolicy, Fingerprint};
use crate::core::{interfaces::*, models::*};
use crate::infrastructure::processors::{
    compute_framework_closure, render_chunk, render_hot_update, ArtifactNamer, BuildId, ChunkKind,
    ChunkPartitioner, ChunkPlan, FrameworkChunkPredicate, PartitionConfig, RUNTIME_CHUNK,
};
use crate::infrastructure::{collect_modules, TemplateHtmlShell};
use crate::utils::{BedrockError, ErrorContext, Logger, Result, Timer};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

/// Entry module candidates, in lookup order, relative to the entry directory
const ENTRY_CANDIDATES: &[&str] = &[
    "main.tsx", "main.ts", "main.jsx", "main.js", "index.tsx", "index.ts", "index.jsx", "index.js",
];

pub const MANIFEST_FILE: &str = "manifest.json";
pub const HTML_FILE: &str = "index.html";
pub const REPORT_FILE: &str = "bundle-report.json";

/// What the previous build looked like, for hot-update diffs
#[derive(Debug, Clone)]
struct BuildSnapshot {
    build_id: BuildId,
    /// module id -> (chunk name, content hash)
    modules: BTreeMap<String, (String, String)>,
}

/// Hot-update manifest: updated chunks, removed chunks, removed modules
#[derive(Debug, Serialize)]
struct HotUpdateManifest {
    c: Vec<String>,
    r: Vec<String>,
    m: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BundleReport<'a> {
    build_id: &'a str,
    mode: BuildMode,
    closure: &'a [std::path::PathBuf],
    chunks: Vec<ChunkReport<'a>>,
    assets: &'a [EmittedAsset],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChunkReport<'a> {
    name: &'a str,
    eager: bool,
    size: usize,
    modules: Vec<&'a str>,
}

/// Main build service implementation
pub struct BedrockBuildService {
    fs_service: Arc<dyn FileSystemService>,
    js_processor: Arc<dyn JsProcessor>,
    css_processor: Arc<dyn CssProcessor>,
    html_shell: Option<Arc<dyn HtmlShell>>,
    cache: Option<Arc<CacheController>>,
    last_build: Option<BuildSnapshot>,
}

impl BedrockBuildService {
    pub fn new(
        fs_service: Arc<dyn FileSystemService>,
        js_processor: Arc<dyn JsProcessor>,
        css_processor: Arc<dyn CssProcessor>,
    ) -> Self {
        Self {
            fs_service,
            js_processor,
            css_processor,
            html_shell: None,
            cache: None,
            last_build: None,
        }
    }

    pub fn with_html_shell(mut self, html_shell: Arc<dyn HtmlShell>) -> Self {
        self.html_shell = Some(html_shell);
        self
    }

    pub fn with_cache(mut self, cache: Arc<CacheController>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&Arc<CacheController>> {
        self.cache.as_ref()
    }

    /// Open the persistent cache for the configured mode unless one was
    /// injected or caching is disabled
    fn ensure_cache(&mut self, config: &BuildConfig) {
        if self.cache.is_none() && config.enable_cache {
            let policy = CachePolicy::for_mode(config.mode, &config.cache_dir);
            self.cache = Some(Arc::new(CacheController::open(policy)));
        }
    }

    async fn run(&mut self, config: &BuildConfig, incremental: bool) -> Result<BuildResult> {
        let start = Instant::now();
        let _timer = Timer::start("Build");
        Logger::build_start(&config.root, &config.outdir, config.mode.as_str());

        // Fail on bad naming settings before touching the output directory
        let namer = ArtifactNamer::for_mode(config.mode, config.hash_digest_length)?;

        self.ensure_cache(config);
        if let Some(cache) = &self.cache {
            cache.begin_generation();
        }

        let closure = compute_framework_closure(config.mode, &config.framework_packages, &config.root);

        let modules = collect_modules(self.fs_service.as_ref(), config, &closure).await?;
        let mut warnings = Vec::new();

        let entries = match find_entry_module(config, &modules) {
            Some(id) => vec![id],
            None => {
                let warning = format!(
                    "No entry module (main.* or index.*) found in {}",
                    config.entry.display()
                );
                Logger::warn(&warning);
                warnings.push(warning);
                Vec::new()
            }
        };

        let chunks = {
            let _timer = Timer::start("Chunk partitioning");
            ChunkPartitioner::new(PartitionConfig {
                max_chunk_size: config.max_chunk_size,
            })
            .with_framework_group(FrameworkChunkPredicate::new(closure.clone()))
            .partition(&modules, &entries)
        };

        // WASM first: chunk sources embed the emitted file names
        let mut assets = Vec::new();
        let mut wasm_urls = HashMap::new();
        for chunk in &chunks {
            for module in chunk.wasm_modules() {
                let file_name = namer.name_asset(AssetClass::Wasm, &module.id, &module.content)?;
                wasm_urls.insert(
                    module.id.clone(),
                    format!("{}{}", config.public_path, file_name),
                );
                assets.push(EmittedAsset {
                    logical_name: module.id.clone(),
                    file_name,
                    class: AssetClass::Wasm,
                    chunk: Some(chunk.name.clone()),
                    size: module.content.len(),
                    module_count: 1,
                    content_hash: namer.content_hash(&module.content),
                    cached: false,
                    content: module.content.clone(),
                });
            }
        }

        let mut cache_hits = 0;
        let mut chunk_assets = Vec::new();
        for chunk in &chunks {
            if emits_script(chunk) {
                let source = render_chunk(chunk, &wasm_urls);
                let (bytes, cached) = self.process_script(config, chunk, source).await?;
                cache_hits += cached as usize;
                chunk_assets.push(emitted(&namer, AssetClass::Script, chunk, "js", bytes, cached)?);
            }

            if chunk.style_modules().next().is_some() {
                let source = chunk
                    .style_modules()
                    .map(|m| m.source().into_owned())
                    .collect::<Vec<_>>()
                    .join("\n");
                let (bytes, cached) = self.process_style(config, chunk, source).await?;
                cache_hits += cached as usize;
                chunk_assets.push(emitted(&namer, AssetClass::Style, chunk, "css", bytes, cached)?);
            }
        }
        // Load order: chunk scripts and styles, then WASM
        chunk_assets.append(&mut assets);
        let assets = chunk_assets;

        for asset in &assets {
            Logger::chunk_emitted(&asset.logical_name, &asset.file_name, asset.size, asset.cached);
        }

        let asset_hashes: Vec<&str> = assets.iter().map(|a| a.content_hash.as_str()).collect();
        let build_id = BuildId::next(
            self.last_build.as_ref().map(|s| &s.build_id),
            &asset_hashes,
        );
        let snapshot = BuildSnapshot {
            build_id: build_id.clone(),
            modules: chunks
                .iter()
                .flat_map(|chunk| {
                    chunk.modules.iter().map(|m| {
                        (m.id.clone(), (chunk.name.clone(), namer.content_hash(&m.content)))
                    })
                })
                .collect(),
        };

        let patching = incremental && config.mode.is_development();
        let hot_updates = match (&self.last_build, patching) {
            (Some(previous), true) => {
                hot_update_assets(&namer, previous, &snapshot, &chunks, &wasm_urls)?
            }
            _ => Vec::new(),
        };

        let manifest = AssetManifest::from_assets(&assets);

        // A development rebuild keeps older hot-update files for clients
        // still catching up
        if !patching {
            self.fs_service.clean_directory(&config.outdir).await?;
        }
        self.write_outputs(config, &assets, &hot_updates, &manifest).await?;

        let result_closure = closure.paths().to_vec();
        if config.mode.is_analyze() {
            let report = BundleReport {
                build_id: &build_id.hash,
                mode: config.mode,
                closure: &result_closure,
                chunks: chunks
                    .iter()
                    .map(|c| ChunkReport {
                        name: &c.name,
                        eager: c.eager,
                        size: c.modules.iter().map(|m| m.content.len()).sum(),
                        modules: c.modules.iter().map(|m| m.id.as_str()).collect(),
                    })
                    .collect(),
                assets: &assets,
            };
            let json = serde_json::to_vec_pretty(&report)?;
            self.fs_service
                .write_file(&config.outdir.join(REPORT_FILE), &json)
                .await?;
            Logger::info(&format!("📈 Bundle report written to {}", REPORT_FILE));
        }

        if let Some(cache) = &self.cache {
            let evicted = cache.end_generation();
            if evicted > 0 {
                Logger::debug(&format!("Evicted {} cache entries from memory", evicted));
            }
        }

        self.last_build = Some(snapshot);

        let build_time = start.elapsed();
        Logger::build_complete(
            modules.len(),
            assets.len() + hot_updates.len(),
            cache_hits,
            build_time,
            &config.outdir,
        );

        Ok(BuildResult {
            build_id: build_id.hash,
            mode: Some(config.mode),
            closure: result_closure,
            assets,
            hot_updates,
            manifest,
            modules_processed: modules.len(),
            cache_hits,
            build_time,
            warnings,
        })
    }

    async fn process_script(
        &self,
        config: &BuildConfig,
        chunk: &ChunkPlan,
        source: String,
    ) -> Result<(Vec<u8>, bool)> {
        let js = self.js_processor.clone();
        let name = chunk.name.clone();
        let key = Fingerprint::new("script")
            .field("mode", config.mode.as_str())
            .field("stage", &js.cache_identity())
            .field("chunk", &chunk.name)
            .bytes("source", source.as_bytes())
            .finish();

        self.cached_stage(&key, || async move {
            js.process_chunk(&name, &source)
                .await
                .map(String::into_bytes)
        })
        .await
        .map_err(|e| stage_error("Script", chunk, e))
    }

    async fn process_style(
        &self,
        config: &BuildConfig,
        chunk: &ChunkPlan,
        source: String,
    ) -> Result<(Vec<u8>, bool)> {
        let css = self.css_processor.clone();
        let name = chunk.name.clone();
        let key = Fingerprint::new("style")
            .field("mode", config.mode.as_str())
            .field("stage", &css.cache_identity())
            .field("chunk", &chunk.name)
            .bytes("source", source.as_bytes())
            .finish();

        self.cached_stage(&key, || async move {
            css.process_stylesheet(&name, &source)
                .await
                .map(String::into_bytes)
        })
        .await
        .map_err(|e| stage_error("Stylesheet", chunk, e))
    }

    async fn cached_stage<F, Fut>(&self, key: &str, compute: F) -> Result<(Vec<u8>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<u8>>>,
    {
        match &self.cache {
            Some(cache) => cache.get_or_compute(key, compute).await,
            None => Ok((compute().await?, false)),
        }
    }

    async fn write_outputs(
        &self,
        config: &BuildConfig,
        assets: &[EmittedAsset],
        hot_updates: &[EmittedAsset],
        manifest: &AssetManifest,
    ) -> Result<()> {
        let _timer = Timer::start("Writing outputs");
        self.fs_service.create_directory(&config.outdir).await?;

        for asset in assets.iter().chain(hot_updates) {
            self.fs_service
                .write_file(&config.outdir.join(&asset.file_name), &asset.content)
                .await?;
        }

        let manifest_json = serde_json::to_vec_pretty(&manifest.assets)?;
        self.fs_service
            .write_file(&config.outdir.join(MANIFEST_FILE), &manifest_json)
            .await?;

        let html = match &self.html_shell {
            Some(shell) => shell.render(assets).await?,
            None => {
                TemplateHtmlShell::new(config.template.clone(), &config.public_path)
                    .render(assets)
                    .await?
            }
        };
        self.fs_service
            .write_file(&config.outdir.join(HTML_FILE), html.as_bytes())
            .await
    }
}

#[async_trait::async_trait]
impl BuildService for BedrockBuildService {
    async fn build(&mut self, config: &BuildConfig) -> Result<BuildResult> {
        self.last_build = None;
        self.run(config, false).await
    }

    async fn rebuild(&mut self, config: &BuildConfig) -> Result<BuildResult> {
        self.run(config, true).await
    }
}

fn emits_script(chunk: &ChunkPlan) -> bool {
    chunk.kind == ChunkKind::Runtime
        || chunk.kind == ChunkKind::Main
        || chunk.script_modules().next().is_some()
}

fn emitted(
    namer: &ArtifactNamer,
    class: AssetClass,
    chunk: &ChunkPlan,
    extension: &str,
    content: Vec<u8>,
    cached: bool,
) -> Result<EmittedAsset> {
    Ok(EmittedAsset {
        logical_name: format!("{}.{}", chunk.name, extension),
        file_name: namer.name_asset(class, &chunk.name, &content)?,
        class,
        chunk: Some(chunk.name.clone()),
        size: content.len(),
        module_count: match class {
            AssetClass::Style => chunk.style_modules().count(),
            _ => chunk.script_modules().count(),
        },
        content_hash: namer.content_hash(&content),
        cached,
        content,
    })
}

fn stage_error(stage: &str, chunk: &ChunkPlan, error: BedrockError) -> BedrockError {
    match error {
        BedrockError::Build { .. } => error,
        other => BedrockError::build_with_context(
            format!("{} stage failed for chunk '{}'", stage, chunk.name),
            ErrorContext::new().with_detail(other.to_string()),
        ),
    }
}

/// Entry module id: first `main.*` then `index.*` directly under the entry
/// directory
fn find_entry_module(config: &BuildConfig, modules: &[ModuleInfo]) -> Option<String> {
    let entry_dir = std::fs::canonicalize(&config.entry).unwrap_or_else(|_| config.entry.clone());
    ENTRY_CANDIDATES.iter().find_map(|candidate| {
        let path = entry_dir.join(candidate);
        modules
            .iter()
            .find(|m| m.path == path)
            .map(|m| m.id.clone())
    })
}

/// Patches for every chunk whose script modules changed since `previous`,
/// plus the manifest telling the runtime which chunks to fetch. Style-only
/// changes need no patch: development style names are stable.
fn hot_update_assets(
    namer: &ArtifactNamer,
    previous: &BuildSnapshot,
    current: &BuildSnapshot,
    chunks: &[ChunkPlan],
    wasm_urls: &HashMap<String, String>,
) -> Result<Vec<EmittedAsset>> {
    let mut updated = Vec::new();
    let mut hot_updates = Vec::new();

    let mut removed_by_chunk: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    let mut removed_modules = Vec::new();
    for (id, (chunk, _)) in &previous.modules {
        if !current.modules.contains_key(id) {
            removed_by_chunk
                .entry(chunk.as_str())
                .or_default()
                .push(id.clone());
            removed_modules.push(id.clone());
        }
    }

    for chunk in chunks {
        let changed: Vec<&ModuleInfo> = chunk
            .script_modules()
            .filter(|m| previous.modules.get(&m.id) != current.modules.get(&m.id))
            .collect();
        let removed = removed_by_chunk.remove(chunk.name.as_str()).unwrap_or_default();
        if changed.is_empty() && removed.is_empty() {
            continue;
        }

        let source = render_hot_update(&chunk.name, changed.iter().copied(), &removed, wasm_urls);
        let file_name = namer.hot_update_chunk_name(&chunk.name, &previous.build_id)?;
        updated.push(chunk.name.clone());
        hot_updates.push(EmittedAsset {
            logical_name: file_name.clone(),
            file_name,
            class: AssetClass::HotUpdateChunk,
            chunk: Some(chunk.name.clone()),
            size: source.len(),
            module_count: changed.len(),
            content_hash: namer.content_hash(source.as_bytes()),
            cached: false,
            content: source.into_bytes(),
        });
    }

    if updated.is_empty() && removed_modules.is_empty() {
        return Ok(hot_updates);
    }

    let previous_chunks: BTreeSet<&str> = previous.modules.values().map(|(c, _)| c.as_str()).collect();
    let current_chunks: BTreeSet<&str> = current.modules.values().map(|(c, _)| c.as_str()).collect();
    let manifest = HotUpdateManifest {
        c: updated,
        r: previous_chunks
            .difference(&current_chunks)
            .map(|c| c.to_string())
            .collect(),
        m: removed_modules,
    };
    let content = serde_json::to_vec(&manifest)?;
    let file_name = namer.hot_update_manifest_name(&previous.build_id, RUNTIME_CHUNK)?;
    hot_updates.push(EmittedAsset {
        logical_name: file_name.clone(),
        file_name,
        class: AssetClass::HotUpdateManifest,
        chunk: None,
        size: content.len(),
        module_count: 0,
        content_hash: namer.content_hash(&content),
        cached: false,
        content,
    });

    Ok(hot_updates)
}

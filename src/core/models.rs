use crate::utils::{BedrockError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// How the build is being produced. Drives closure computation, naming and
/// cache retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Development,
    Production,
    /// Production build that also writes a static bundle report
    Analyze,
}

impl BuildMode {
    /// Parse an explicit mode string. Anything unrecognised is a
    /// configuration failure, raised before any build work starts.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(BuildMode::Development),
            "production" | "prod" => Ok(BuildMode::Production),
            "analyze" => Ok(BuildMode::Analyze),
            other => Err(BedrockError::config(format!(
                "Unknown build mode '{}' (expected development, production or analyze)",
                other
            ))),
        }
    }

    /// Derive the mode from `NODE_ENV` / `ANALYZE` style values.
    ///
    /// Only an exact `production` selects a production build; a non-empty
    /// analyze flag upgrades production to [`BuildMode::Analyze`].
    pub fn from_env_values(node_env: Option<&str>, analyze: Option<&str>) -> Self {
        let production = node_env == Some("production");
        let analyze = analyze.map(|v| !v.is_empty()).unwrap_or(false);

        match (production, analyze) {
            (true, true) => BuildMode::Analyze,
            (true, false) => BuildMode::Production,
            (false, _) => BuildMode::Development,
        }
    }

    pub fn from_env() -> Self {
        let node_env = std::env::var("NODE_ENV").ok();
        let analyze = std::env::var("ANALYZE").ok();
        Self::from_env_values(node_env.as_deref(), analyze.as_deref())
    }

    pub fn is_development(&self) -> bool {
        matches!(self, BuildMode::Development)
    }

    pub fn is_analyze(&self) -> bool {
        matches!(self, BuildMode::Analyze)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Development => "development",
            BuildMode::Production => "production",
            BuildMode::Analyze => "analyze",
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully resolved build configuration (file config merged with CLI flags)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    pub root: PathBuf,
    /// Directory holding the application sources
    pub entry: PathBuf,
    pub outdir: PathBuf,
    /// HTML shell template; a minimal document is generated when absent
    pub template: Option<PathBuf>,
    pub mode: BuildMode,
    pub framework_packages: Vec<String>,
    pub hash_digest_length: usize,
    pub public_path: String,
    pub cache_dir: PathBuf,
    /// Split non-framework chunks above this many bytes
    pub max_chunk_size: Option<usize>,
    pub enable_cache: bool,
}

pub const DEFAULT_FRAMEWORK_PACKAGES: &[&str] = &["react", "react-dom"];
pub const DEFAULT_HASH_DIGEST_LENGTH: usize = 16;

impl BuildConfig {
    pub fn for_root(root: &Path, mode: BuildMode) -> Self {
        Self {
            root: root.to_path_buf(),
            entry: root.join("src"),
            outdir: root.join("dist"),
            template: Some(root.join("index.html")),
            mode,
            framework_packages: DEFAULT_FRAMEWORK_PACKAGES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            hash_digest_length: DEFAULT_HASH_DIGEST_LENGTH,
            public_path: String::new(),
            cache_dir: default_cache_dir(root),
            max_chunk_size: None,
            enable_cache: true,
        }
    }
}

pub fn default_cache_dir(root: &Path) -> PathBuf {
    root.join("node_modules").join(".cache").join("bedrock")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleType {
    JavaScript,
    TypeScript,
    Css,
    Wasm,
    Unknown,
}

impl ModuleType {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "js" | "jsx" | "mjs" | "cjs" => ModuleType::JavaScript,
            "ts" | "tsx" | "mts" => ModuleType::TypeScript,
            "css" => ModuleType::Css,
            "wasm" => ModuleType::Wasm,
            _ => ModuleType::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(ModuleType::Unknown)
    }

    pub fn is_script(&self) -> bool {
        matches!(self, ModuleType::JavaScript | ModuleType::TypeScript)
    }
}

/// A module as handed to the partitioning stage
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    /// Root-relative, `/`-separated identifier. Stable across machines so
    /// rendered chunks hash identically everywhere.
    pub id: String,
    /// Resolved filesystem path, used for chunk membership
    pub path: PathBuf,
    pub module_type: ModuleType,
    pub content: Vec<u8>,
}

impl ModuleInfo {
    pub fn new(root: &Path, path: PathBuf, content: Vec<u8>) -> Self {
        Self {
            id: module_id(root, &path),
            module_type: ModuleType::from_path(&path),
            path,
            content,
        }
    }

    pub fn source(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

/// Root-relative module identifier with `/` separators
pub fn module_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Output asset classes, each with its own filename template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetClass {
    Script,
    Style,
    Wasm,
    HotUpdateChunk,
    HotUpdateManifest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmittedAsset {
    /// Logical name (`main`, `framework.css`, `hello.wasm`, ...)
    pub logical_name: String,
    pub file_name: String,
    pub class: AssetClass,
    pub chunk: Option<String>,
    pub size: usize,
    pub module_count: usize,
    pub content_hash: String,
    pub cached: bool,
    #[serde(skip)]
    pub content: Vec<u8>,
}

/// Logical asset name -> emitted file name, written as `manifest.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetManifest {
    pub assets: BTreeMap<String, String>,
}

impl AssetManifest {
    pub fn from_assets(assets: &[EmittedAsset]) -> Self {
        let assets = assets
            .iter()
            .filter(|a| {
                !matches!(
                    a.class,
                    AssetClass::HotUpdateChunk | AssetClass::HotUpdateManifest
                )
            })
            .map(|a| (a.logical_name.clone(), a.file_name.clone()))
            .collect();
        Self { assets }
    }

    pub fn get(&self, logical_name: &str) -> Option<&str> {
        self.assets.get(logical_name).map(String::as_str)
    }
}

#[derive(Debug, Default)]
pub struct BuildResult {
    pub build_id: String,
    pub mode: Option<BuildMode>,
    pub closure: Vec<PathBuf>,
    pub assets: Vec<EmittedAsset>,
    pub hot_updates: Vec<EmittedAsset>,
    pub manifest: AssetManifest,
    pub modules_processed: usize,
    pub cache_hits: usize,
    pub build_time: std::time::Duration,
    pub warnings: Vec<String>,
}

impl BuildResult {
    pub fn asset(&self, logical_name: &str) -> Option<&EmittedAsset> {
        self.assets.iter().find(|a| a.logical_name == logical_name)
    }
}

#[derive(Debug, Default)]
pub struct ProjectStructure {
    pub js_modules: Vec<PathBuf>,
    pub css_files: Vec<PathBuf>,
    pub wasm_files: Vec<PathBuf>,
    pub other_files: Vec<PathBuf>,
}

impl ProjectStructure {
    pub fn module_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.js_modules
            .iter()
            .chain(self.css_files.iter())
            .chain(self.wasm_files.iter())
    }

    pub fn extend(&mut self, other: ProjectStructure) {
        self.js_modules.extend(other.js_modules);
        self.css_files.extend(other.css_files);
        self.wasm_files.extend(other.wasm_files);
        self.other_files.extend(other.other_files);
    }
}

use crate::core::models::{
    default_cache_dir, BuildConfig, BuildMode, DEFAULT_FRAMEWORK_PACKAGES,
    DEFAULT_HASH_DIGEST_LENGTH,
};
use crate::utils::{BedrockError, ErrorContext, Logger, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "bedrock.config.json";

/// Configuration file format (bedrock.config.json)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BedrockConfig {
    /// Packages whose dependency closure forms the framework chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework_packages: Option<Vec<String>>,

    /// Source directory (default: "src")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,

    /// Output directory (default: "dist")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outdir: Option<String>,

    /// HTML shell template (default: "index.html" when present)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_digest_length: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_directory: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chunk_size: Option<usize>,
}

/// Values given on the command line; each one beats the config file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Explicit mode string; `NODE_ENV`/`ANALYZE` decide when absent
    pub mode: Option<String>,
    pub outdir: Option<String>,
    pub framework_packages: Option<Vec<String>>,
    pub max_chunk_size: Option<usize>,
    pub no_cache: bool,
}

/// Config loader that supports config files with CLI override
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load `bedrock.config.json` from the project root if it exists
    pub fn load_from_file(root: &Path) -> Result<Option<BedrockConfig>> {
        let config_path = root.join(CONFIG_FILE);

        if !config_path.exists() {
            Logger::debug(&format!("No {} found, using defaults", CONFIG_FILE));
            return Ok(None);
        }

        Logger::debug(&format!("Loading config from {}", config_path.display()));

        let content = std::fs::read_to_string(&config_path).map_err(BedrockError::Io)?;

        let config: BedrockConfig = serde_json::from_str(&content).map_err(|e| {
            BedrockError::config_with_context(
                format!("Failed to parse {}: {}", CONFIG_FILE, e),
                ErrorContext::new().with_file(config_path.clone()),
            )
        })?;

        Logger::debug("✅ Config file loaded successfully");
        Ok(Some(config))
    }

    /// Merge file config with CLI arguments (CLI > config file > default)
    /// and validate the result. Every failure here is a configuration error.
    pub fn merge_with_cli(
        file_config: Option<BedrockConfig>,
        root: PathBuf,
        cli: CliOverrides,
    ) -> Result<BuildConfig> {
        let base = file_config.unwrap_or_default();

        let root = std::fs::canonicalize(&root).map_err(|e| {
            BedrockError::config_with_context(
                format!("Project root is not accessible: {}", e),
                ErrorContext::new().with_file(root.clone()),
            )
        })?;

        let mode = match cli.mode.as_deref() {
            Some(explicit) => BuildMode::parse(explicit)?,
            None => BuildMode::from_env(),
        };

        let framework_packages = cli
            .framework_packages
            .or(base.framework_packages)
            .unwrap_or_else(|| {
                DEFAULT_FRAMEWORK_PACKAGES
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            });
        if framework_packages.iter().any(|p| p.trim().is_empty()) {
            return Err(BedrockError::config("frameworkPackages contains an empty name"));
        }

        let hash_digest_length = base.hash_digest_length.unwrap_or(DEFAULT_HASH_DIGEST_LENGTH);
        if !(1..=16).contains(&hash_digest_length) {
            return Err(BedrockError::config(format!(
                "hashDigestLength must be between 1 and 16 (got {})",
                hash_digest_length
            )));
        }

        if cli.max_chunk_size.or(base.max_chunk_size) == Some(0) {
            return Err(BedrockError::config("maxChunkSize must be greater than 0"));
        }

        let outdir = resolve(&root, cli.outdir.as_deref().or(base.outdir.as_deref()).unwrap_or("dist"));
        let entry = resolve(&root, base.entry.as_deref().unwrap_or("src"));
        if outdir == root || entry.starts_with(&outdir) {
            return Err(BedrockError::config(format!(
                "Output directory {} would overwrite project sources",
                outdir.display()
            )));
        }

        let template = base
            .template
            .as_deref()
            .map(|t| resolve(&root, t))
            .or_else(|| Some(root.join("index.html")));

        let cache_dir = base
            .cache_directory
            .as_deref()
            .map(|c| resolve(&root, c))
            .unwrap_or_else(|| default_cache_dir(&root));

        Ok(BuildConfig {
            entry,
            outdir,
            template,
            mode,
            framework_packages,
            hash_digest_length,
            public_path: base.public_path.unwrap_or_default(),
            cache_dir,
            max_chunk_size: cli.max_chunk_size.or(base.max_chunk_size),
            enable_cache: !cli.no_cache,
            root,
        })
    }

    /// Load the config file under `root` and merge it with CLI overrides
    pub fn load(root: PathBuf, cli: CliOverrides) -> Result<BuildConfig> {
        let file_config = Self::load_from_file(&root)?;
        Self::merge_with_cli(file_config, root, cli)
    }
}

/// Resolve a config path relative to the project root
fn resolve(root: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explicit(mode: &str) -> CliOverrides {
        CliOverrides {
            mode: Some(mode.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_load_from_file_not_exists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = ConfigLoader::load_from_file(temp_dir.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_load_from_file_valid() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            temp_dir.path().join(CONFIG_FILE),
            r#"{"outdir": "build", "frameworkPackages": ["preact"], "hashDigestLength": 8}"#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(temp_dir.path()).unwrap().unwrap();
        assert_eq!(config.outdir, Some("build".to_string()));
        assert_eq!(config.framework_packages, Some(vec!["preact".to_string()]));
        assert_eq!(config.hash_digest_length, Some(8));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join(CONFIG_FILE), r#"{"outdir": 3}"#).unwrap();

        let err = ConfigLoader::load_from_file(temp_dir.path()).unwrap_err();
        assert!(err.is_fatal_at_configuration());
    }

    #[test]
    fn test_merge_with_cli_override() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_config = BedrockConfig {
            outdir: Some("build".to_string()),
            max_chunk_size: Some(1000),
            ..Default::default()
        };

        let merged = ConfigLoader::merge_with_cli(
            Some(file_config),
            temp_dir.path().to_path_buf(),
            CliOverrides {
                mode: Some("production".to_string()),
                outdir: Some("dist-override".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert!(merged.outdir.ends_with("dist-override"));
        assert_eq!(merged.max_chunk_size, Some(1000));
        assert_eq!(merged.mode, BuildMode::Production);
        assert_eq!(merged.framework_packages, vec!["react", "react-dom"]);
        assert!(merged.cache_dir.ends_with("node_modules/.cache/bedrock"));
        assert!(merged.enable_cache);
    }

    #[test]
    fn test_unknown_mode_is_fatal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = ConfigLoader::merge_with_cli(None, temp_dir.path().to_path_buf(), explicit("staging"))
            .unwrap_err();
        assert!(err.is_fatal_at_configuration());
    }

    #[test]
    fn test_invalid_digest_length_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_config = BedrockConfig {
            hash_digest_length: Some(17),
            ..Default::default()
        };
        let err = ConfigLoader::merge_with_cli(
            Some(file_config),
            temp_dir.path().to_path_buf(),
            explicit("production"),
        )
        .unwrap_err();
        assert!(err.is_fatal_at_configuration());
    }

    #[test]
    fn test_outdir_cannot_be_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = ConfigLoader::merge_with_cli(
            None,
            temp_dir.path().to_path_buf(),
            CliOverrides {
                mode: Some("development".to_string()),
                outdir: Some(".".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.is_fatal_at_configuration());
    }

    #[test]
    fn test_missing_root_is_config_error() {
        let err = ConfigLoader::merge_with_cli(
            None,
            PathBuf::from("/definitely/not/here"),
            explicit("production"),
        )
        .unwrap_err();
        assert!(err.is_fatal_at_configuration());
    }
}

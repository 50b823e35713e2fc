// Deterministic artifact naming
// Production names come from a digest of the final bytes; development keeps
// logical names so incremental rebuilds overwrite the same files

use crate::core::models::{AssetClass, BuildMode, DEFAULT_HASH_DIGEST_LENGTH};
use crate::utils::{BedrockError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use xxhash_rust::xxh64::{xxh64, Xxh64};

static PLACEHOLDER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\w+)(?::(\d+))?\]").expect("placeholder pattern is valid"));

const PLACEHOLDERS: &[&str] = &["name", "id", "contenthash", "fullhash", "runtime"];

/// Hex digits in an xxHash64 digest
pub const MAX_DIGEST_LENGTH: usize = 16;

/// Values substituted into a [`FilenameTemplate`]
#[derive(Debug, Clone, Default)]
pub struct TemplateContext<'a> {
    pub name: Option<&'a str>,
    pub id: Option<&'a str>,
    pub content_hash: Option<&'a str>,
    pub full_hash: Option<&'a str>,
    pub runtime: Option<&'a str>,
}

/// A filename pattern such as `[contenthash].js` or
/// `[id].[fullhash].hot-update.js`. `[hash:8]` style lengths truncate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameTemplate {
    raw: String,
}

impl FilenameTemplate {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() || raw.contains('/') || raw.contains('\\') {
            return Err(BedrockError::config(format!(
                "Invalid filename template '{}'",
                raw
            )));
        }

        for caps in PLACEHOLDER_REGEX.captures_iter(raw) {
            let placeholder = &caps[1];
            if !PLACEHOLDERS.contains(&placeholder) {
                return Err(BedrockError::config(format!(
                    "Unknown placeholder [{}] in filename template '{}'",
                    placeholder, raw
                )));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn uses(&self, placeholder: &str) -> bool {
        PLACEHOLDER_REGEX
            .captures_iter(&self.raw)
            .any(|caps| &caps[1] == placeholder)
    }

    pub fn render(&self, ctx: &TemplateContext<'_>) -> Result<String> {
        let mut missing: Option<String> = None;

        let rendered = PLACEHOLDER_REGEX.replace_all(&self.raw, |caps: &regex::Captures| {
            let value = match &caps[1] {
                "name" => ctx.name,
                "id" => ctx.id,
                "contenthash" => ctx.content_hash,
                "fullhash" => ctx.full_hash,
                "runtime" => ctx.runtime,
                _ => None,
            };

            match value {
                Some(value) => match caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok()) {
                    Some(len) => value.chars().take(len).collect(),
                    None => value.to_string(),
                },
                None => {
                    missing.get_or_insert_with(|| caps[1].to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(placeholder) => Err(BedrockError::build(format!(
                "No value for [{}] in filename template '{}'",
                placeholder, self.raw
            ))),
            None => Ok(rendered.into_owned()),
        }
    }
}

/// Identifier of one compilation. Hot-update files are named after the build
/// they patch, so the identifier must differ between every two builds of a
/// process even when their content is identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildId {
    pub sequence: u64,
    pub hash: String,
}

impl BuildId {
    /// Next identifier after `previous`, mixing the sequence number into a
    /// digest of the build's asset hashes
    pub fn next(previous: Option<&BuildId>, asset_hashes: &[&str]) -> Self {
        let sequence = previous.map(|p| p.sequence + 1).unwrap_or(1);

        let mut hasher = Xxh64::new(0);
        hasher.update(&sequence.to_le_bytes());
        for hash in asset_hashes {
            hasher.update(hash.as_bytes());
            hasher.update(&[0]);
        }

        Self {
            sequence,
            hash: format!("{:016x}", hasher.digest()),
        }
    }
}

/// Output naming for every asset class
#[derive(Debug, Clone)]
pub struct ArtifactNamer {
    mode: BuildMode,
    digest_length: usize,
    script: FilenameTemplate,
    style: FilenameTemplate,
    wasm: FilenameTemplate,
    hot_update_chunk: FilenameTemplate,
    hot_update_manifest: FilenameTemplate,
}

impl ArtifactNamer {
    pub fn for_mode(mode: BuildMode, digest_length: usize) -> Result<Self> {
        if digest_length == 0 || digest_length > MAX_DIGEST_LENGTH {
            return Err(BedrockError::config(format!(
                "hashDigestLength must be between 1 and {} (got {})",
                MAX_DIGEST_LENGTH, digest_length
            )));
        }

        let (script, style) = if mode.is_development() {
            ("[name].js", "[name].css")
        } else {
            ("[contenthash].js", "[contenthash].css")
        };

        Ok(Self {
            mode,
            digest_length,
            script: FilenameTemplate::parse(script)?,
            style: FilenameTemplate::parse(style)?,
            wasm: FilenameTemplate::parse("[contenthash].wasm")?,
            hot_update_chunk: FilenameTemplate::parse("[id].[fullhash].hot-update.js")?,
            hot_update_manifest: FilenameTemplate::parse("[fullhash].[runtime].hot-update.json")?,
        })
    }

    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    pub fn template(&self, class: AssetClass) -> &FilenameTemplate {
        match class {
            AssetClass::Script => &self.script,
            AssetClass::Style => &self.style,
            AssetClass::Wasm => &self.wasm,
            AssetClass::HotUpdateChunk => &self.hot_update_chunk,
            AssetClass::HotUpdateManifest => &self.hot_update_manifest,
        }
    }

    /// xxHash64 of the bytes as lowercase hex, truncated to the digest length
    pub fn content_hash(&self, content: &[u8]) -> String {
        let mut hash = format!("{:016x}", xxh64(content, 0));
        hash.truncate(self.digest_length);
        hash
    }

    /// File name for a script, style or WASM asset
    pub fn name_asset(&self, class: AssetClass, logical_name: &str, content: &[u8]) -> Result<String> {
        let content_hash = self.content_hash(content);
        self.template(class).render(&TemplateContext {
            name: Some(logical_name),
            id: Some(logical_name),
            content_hash: Some(&content_hash),
            ..Default::default()
        })
    }

    /// `[id].[fullhash].hot-update.js` for a chunk patched on top of `previous`
    pub fn hot_update_chunk_name(&self, chunk_id: &str, previous: &BuildId) -> Result<String> {
        let full_hash = self.full_hash(previous);
        self.hot_update_chunk.render(&TemplateContext {
            id: Some(chunk_id),
            name: Some(chunk_id),
            full_hash: Some(&full_hash),
            ..Default::default()
        })
    }

    /// `[fullhash].[runtime].hot-update.json` describing a patch on `previous`
    pub fn hot_update_manifest_name(&self, previous: &BuildId, runtime: &str) -> Result<String> {
        let full_hash = self.full_hash(previous);
        self.hot_update_manifest.render(&TemplateContext {
            runtime: Some(runtime),
            full_hash: Some(&full_hash),
            ..Default::default()
        })
    }

    fn full_hash(&self, build: &BuildId) -> String {
        build.hash.chars().take(self.digest_length).collect()
    }
}

impl Default for ArtifactNamer {
    fn default() -> Self {
        Self::for_mode(BuildMode::Production, DEFAULT_HASH_DIGEST_LENGTH)
            .expect("default templates are valid")
    }
}

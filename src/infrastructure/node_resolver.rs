use crate::utils::{BedrockError, Result};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};

/// The subset of `package.json` the closure walker cares about.
/// Version ranges are kept only for diagnostics.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageJson {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// Insertion order is preserved (serde_json `preserve_order`)
    #[serde(default)]
    pub dependencies: serde_json::Map<String, serde_json::Value>,
}

/// A located, parsed package descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    /// The name the package was requested under
    pub name: String,
    pub version: Option<String>,
    /// Absolute directory containing `package.json`
    pub directory: PathBuf,
    pub manifest_path: PathBuf,
    /// Declared runtime dependency names, in declaration order
    pub dependencies: Vec<String>,
}

/// Outcome of a descriptor lookup. Neither failure variant is fatal; the
/// closure walker treats both as "no dependencies".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(PackageDescriptor),
    NotFound,
    Malformed { manifest_path: PathBuf, reason: String },
}

impl Resolution {
    pub fn descriptor(self) -> Option<PackageDescriptor> {
        match self {
            Resolution::Resolved(descriptor) => Some(descriptor),
            _ => None,
        }
    }

    /// For callers that require the package: both failure variants become
    /// a `Resolution` error
    pub fn into_result(self, package_name: &str) -> Result<PackageDescriptor> {
        match self {
            Resolution::Resolved(descriptor) => Ok(descriptor),
            Resolution::NotFound => Err(BedrockError::Resolution {
                package: package_name.to_string(),
                reason: "no package.json found in any node_modules".to_string(),
            }),
            Resolution::Malformed { manifest_path, reason } => Err(BedrockError::Resolution {
                package: package_name.to_string(),
                reason: format!("{}: {}", manifest_path.display(), reason),
            }),
        }
    }
}

/// Node.js-style package descriptor lookup over `node_modules` hierarchies
#[derive(Debug, Clone, Default)]
pub struct PackageResolver;

impl PackageResolver {
    pub fn new() -> Self {
        Self
    }

    /// Locate `<name>/package.json` starting from each base directory in
    /// turn, walking up through ancestor `node_modules` folders. The first
    /// (nearest) hit wins, which is what makes nested and hoisted installs
    /// resolve the way Node would.
    pub fn resolve_descriptor(&self, package_name: &str, search_from: &[PathBuf]) -> Resolution {
        if !Self::is_valid_package_name(package_name) {
            return Resolution::NotFound;
        }

        for base in search_from {
            for node_modules in Self::node_modules_paths(base) {
                let manifest_path = node_modules.join(package_name).join("package.json");
                if manifest_path.is_file() {
                    return self.read_descriptor(package_name, &manifest_path);
                }
            }
        }

        Resolution::NotFound
    }

    /// Parse a descriptor at a known location
    pub fn read_descriptor(&self, package_name: &str, manifest_path: &Path) -> Resolution {
        let content = match std::fs::read_to_string(manifest_path) {
            Ok(content) => content,
            Err(e) => {
                return Resolution::Malformed {
                    manifest_path: manifest_path.to_path_buf(),
                    reason: e.to_string(),
                }
            }
        };

        let package: PackageJson = match serde_json::from_str(&content) {
            Ok(package) => package,
            Err(e) => {
                return Resolution::Malformed {
                    manifest_path: manifest_path.to_path_buf(),
                    reason: e.to_string(),
                }
            }
        };

        // Symlinked installs (pnpm, workspaces) report their real location,
        // matching how module paths are resolved later on
        let manifest_path = std::fs::canonicalize(manifest_path)
            .unwrap_or_else(|_| manifest_path.to_path_buf());
        let directory = match manifest_path.parent() {
            Some(dir) => dir.to_path_buf(),
            None => {
                return Resolution::Malformed {
                    manifest_path,
                    reason: "descriptor has no parent directory".to_string(),
                }
            }
        };

        Resolution::Resolved(PackageDescriptor {
            name: package_name.to_string(),
            version: package.version,
            directory,
            manifest_path,
            dependencies: package.dependencies.keys().cloned().collect(),
        })
    }

    /// `node_modules` lookup locations for a directory, nearest first.
    /// Directories already named `node_modules` do not get a nested one.
    pub fn node_modules_paths(from: &Path) -> Vec<PathBuf> {
        from.ancestors()
            .filter(|dir| dir.file_name().map(|n| n != "node_modules").unwrap_or(true))
            .map(|dir| dir.join("node_modules"))
            .collect()
    }

    /// Reject names that would escape a `node_modules` directory
    fn is_valid_package_name(name: &str) -> bool {
        if name.is_empty() || name.starts_with('.') || name.contains('\\') {
            return false;
        }

        let path = Path::new(name);
        if path.is_absolute() {
            return false;
        }

        let normal = path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        let depth = path.components().count();

        // `pkg` or `@scope/pkg`
        normal && (depth == 1 || (depth == 2 && name.starts_with('@')))
    }
}

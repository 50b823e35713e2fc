use crate::core::{interfaces::FileSystemService, models::*};
use crate::infrastructure::processors::ClosurePathList;
use crate::utils::{BedrockError, Logger, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;

pub struct TokioFileSystemService;

impl TokioFileSystemService {
    fn classify(path: PathBuf, structure: &mut ProjectStructure) {
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();
        if file_name.ends_with(".d.ts") {
            structure.other_files.push(path);
            return;
        }

        match ModuleType::from_path(&path) {
            ModuleType::JavaScript | ModuleType::TypeScript => structure.js_modules.push(path),
            ModuleType::Css => structure.css_files.push(path),
            ModuleType::Wasm => structure.wasm_files.push(path),
            ModuleType::Unknown => structure.other_files.push(path),
        }
    }
}

#[async_trait::async_trait]
impl FileSystemService for TokioFileSystemService {
    async fn scan_directory(&self, path: &Path, skip_dirs: &[&Path]) -> Result<ProjectStructure> {
        let mut structure = ProjectStructure::default();
        let mut pending = vec![path.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await.map_err(BedrockError::Io)?;

            while let Some(entry) = entries.next_entry().await.map_err(BedrockError::Io)? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(BedrockError::Io)?;

                if file_type.is_dir() || (file_type.is_symlink() && path.is_dir()) {
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    let skipped = name.starts_with('.')
                        || name == "node_modules"
                        || skip_dirs.iter().any(|s| path.starts_with(s));
                    if !skipped {
                        pending.push(path);
                    }
                } else {
                    Self::classify(path, &mut structure);
                }
            }
        }

        structure.js_modules.sort();
        structure.css_files.sort();
        structure.wasm_files.sort();
        structure.other_files.sort();
        Ok(structure)
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).await.map_err(BedrockError::Io)
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            self.create_directory(parent).await?;
        }

        fs::write(path, content).await.map_err(BedrockError::Io)
    }

    async fn create_directory(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await.map_err(BedrockError::Io)
    }

    async fn clean_directory(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return self.create_directory(path).await;
        }

        let mut entries = fs::read_dir(path).await.map_err(BedrockError::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(BedrockError::Io)? {
            let entry_path = entry.path();
            if entry.file_type().await.map_err(BedrockError::Io)?.is_dir() {
                fs::remove_dir_all(&entry_path).await.map_err(BedrockError::Io)?;
            } else {
                fs::remove_file(&entry_path).await.map_err(BedrockError::Io)?;
            }
        }
        Ok(())
    }
}

/// Gather the modules to partition: application sources under the entry
/// directory plus every file of the framework closure packages.
pub async fn collect_modules(
    fs_service: &dyn FileSystemService,
    config: &BuildConfig,
    closure: &ClosurePathList,
) -> Result<Vec<ModuleInfo>> {
    let root = std::fs::canonicalize(&config.root).unwrap_or_else(|_| config.root.clone());
    let entry = std::fs::canonicalize(&config.entry).unwrap_or_else(|_| config.entry.clone());
    let skip = [config.outdir.as_path(), config.cache_dir.as_path()];

    let mut structure = ProjectStructure::default();
    if entry.is_dir() {
        structure.extend(fs_service.scan_directory(&entry, &skip).await?);
    } else {
        Logger::warn(&format!("Entry directory {} not found", entry.display()));
    }

    // Nested node_modules are skipped by the scan; nested closure packages
    // are closure entries of their own
    for package_dir in closure.iter() {
        if package_dir.is_dir() {
            structure.extend(fs_service.scan_directory(package_dir, &skip).await?);
        }
    }

    let paths: BTreeSet<&PathBuf> = structure.module_paths().collect();
    let mut modules = Vec::with_capacity(paths.len());
    for path in paths {
        let content = fs_service.read_file(path).await?;
        modules.push(ModuleInfo::new(&root, path.clone(), content));
    }

    Ok(modules)
}

// Framework dependency closure
// Walks the declared dependency graph of the framework packages and records
// the directory of every package reached

use crate::core::models::BuildMode;
use crate::infrastructure::node_resolver::{PackageResolver, Resolution};
use crate::utils::{Logger, Timer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Ordered, duplicate-free package directories reachable from the seeds.
/// Frozen once handed to the partitioner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosurePathList {
    paths: Vec<PathBuf>,
}

impl ClosurePathList {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }

    /// True when `module_path` is one of the closure directories or lives
    /// beneath one. Component-wise, so `react-domx` is not under `react-dom`.
    pub fn contains_module(&self, module_path: &Path) -> bool {
        self.paths.iter().any(|dir| module_path.starts_with(dir))
    }

    fn push_unique(&mut self, dir: PathBuf) -> bool {
        if self.paths.contains(&dir) {
            return false;
        }
        self.paths.push(dir);
        true
    }
}

impl IntoIterator for ClosurePathList {
    type Item = PathBuf;
    type IntoIter = std::vec::IntoIter<PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.into_iter()
    }
}

impl FromIterator<PathBuf> for ClosurePathList {
    fn from_iter<I: IntoIterator<Item = PathBuf>>(iter: I) -> Self {
        let mut list = ClosurePathList::empty();
        for path in iter {
            list.push_unique(path);
        }
        list
    }
}

/// Per-run statistics, mostly for logging and tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosureStats {
    pub packages_visited: usize,
    pub packages_skipped: usize,
    pub descriptor_reads: usize,
}

/// Depth-first walker over declared runtime dependencies
#[derive(Debug, Clone, Default)]
pub struct FrameworkClosure {
    resolver: PackageResolver,
}

impl FrameworkClosure {
    pub fn new(resolver: PackageResolver) -> Self {
        Self { resolver }
    }

    pub fn compute(&self, seeds: &[String], root: &Path) -> ClosurePathList {
        self.compute_with_stats(seeds, root).0
    }

    /// Visit order is the pre-order of a recursive walk: seeds in order,
    /// each package's dependencies in declaration order. Packages are
    /// deduplicated by name, so a second on-disk copy of an already visited
    /// name is never expanded.
    pub fn compute_with_stats(&self, seeds: &[String], root: &Path) -> (ClosurePathList, ClosureStats) {
        let mut closure = ClosurePathList::empty();
        let mut visited: HashSet<String> = HashSet::new();
        let mut stats = ClosureStats::default();

        // (package name, directory it is resolved from)
        let mut stack: Vec<(String, PathBuf)> = seeds
            .iter()
            .rev()
            .map(|name| (name.clone(), root.to_path_buf()))
            .collect();

        while let Some((name, relative_to)) = stack.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            stats.packages_visited += 1;
            stats.descriptor_reads += 1;

            let descriptor = match self.resolver.resolve_descriptor(&name, &[relative_to]) {
                Resolution::Resolved(descriptor) => descriptor,
                Resolution::NotFound => {
                    stats.packages_skipped += 1;
                    Logger::package_skipped(&name, "not installed");
                    continue;
                }
                Resolution::Malformed { manifest_path, reason } => {
                    stats.packages_skipped += 1;
                    Logger::package_skipped(
                        &name,
                        &format!("unreadable {} ({})", manifest_path.display(), reason),
                    );
                    continue;
                }
            };

            // Another name already claimed this directory; its dependencies
            // were expanded then
            if !closure.push_unique(descriptor.directory.clone()) {
                continue;
            }

            for dependency in descriptor.dependencies.iter().rev() {
                if !visited.contains(dependency) {
                    stack.push((dependency.clone(), descriptor.directory.clone()));
                }
            }
        }

        (closure, stats)
    }
}

/// Closure for the given build mode. Development builds skip the walk:
/// a separate framework chunk only pays off for long-lived artifacts.
pub fn compute_framework_closure(mode: BuildMode, seeds: &[String], root: &Path) -> ClosurePathList {
    if mode.is_development() {
        Logger::closure_skipped();
        return ClosurePathList::empty();
    }

    let _timer = Timer::start("Framework closure");
    let closure = FrameworkClosure::default().compute(seeds, root);
    Logger::closure_computed(seeds, closure.len());
    closure
}

// Chunk partitioning
// Assigns every module to an output chunk through priority-ordered cache
// groups and renders chunks into loadable scripts

use crate::core::models::{ModuleInfo, ModuleType};
use crate::infrastructure::processors::framework_closure::ClosurePathList;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

pub const RUNTIME_CHUNK: &str = "runtime";
pub const FRAMEWORK_CHUNK: &str = "framework";
pub const MAIN_CHUNK: &str = "main";

/// Priority the framework group is registered with; above every default rule
pub const FRAMEWORK_PRIORITY: i32 = 40;

/// Decides framework chunk membership from the closure directories.
/// Pure over an immutable list, so it is shared freely across workers.
#[derive(Debug, Clone)]
pub struct FrameworkChunkPredicate {
    closure: Arc<ClosurePathList>,
}

impl FrameworkChunkPredicate {
    pub fn new(closure: ClosurePathList) -> Self {
        Self {
            closure: Arc::new(closure),
        }
    }

    pub fn belongs_to_framework_chunk(&self, module_path: &Path) -> bool {
        self.closure.contains_module(module_path)
    }

    pub fn closure(&self) -> &ClosurePathList {
        &self.closure
    }
}

type ModuleTest = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// A named partitioning rule. Higher priority rules are consulted first.
#[derive(Clone)]
pub struct CacheGroup {
    pub name: String,
    pub priority: i32,
    /// Enforced groups are always emitted eagerly and never size-split
    pub enforce: bool,
    test: ModuleTest,
}

impl CacheGroup {
    pub fn new<F>(name: &str, priority: i32, enforce: bool, test: F) -> Self
    where
        F: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            priority,
            enforce,
            test: Arc::new(test),
        }
    }

    pub fn framework(predicate: FrameworkChunkPredicate) -> Self {
        Self::new(FRAMEWORK_CHUNK, FRAMEWORK_PRIORITY, true, move |path| {
            predicate.belongs_to_framework_chunk(path)
        })
    }

    pub fn matches(&self, module_path: &Path) -> bool {
        (self.test)(module_path)
    }
}

impl fmt::Debug for CacheGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheGroup")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("enforce", &self.enforce)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PartitionConfig {
    /// Non-enforced chunks above this size are split into numbered parts
    pub max_chunk_size: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Module loader bootstrap only
    Runtime,
    /// Produced by a cache group
    Group,
    /// Application code not claimed by any group
    Main,
}

#[derive(Debug, Clone)]
pub struct ChunkPlan {
    pub name: String,
    pub kind: ChunkKind,
    pub eager: bool,
    pub modules: Vec<ModuleInfo>,
    /// Module ids executed once the chunk is installed
    pub entries: Vec<String>,
}

impl ChunkPlan {
    pub fn script_modules(&self) -> impl Iterator<Item = &ModuleInfo> {
        self.modules
            .iter()
            .filter(|m| m.module_type.is_script() || m.module_type == ModuleType::Wasm)
    }

    pub fn style_modules(&self) -> impl Iterator<Item = &ModuleInfo> {
        self.modules
            .iter()
            .filter(|m| m.module_type == ModuleType::Css)
    }

    pub fn wasm_modules(&self) -> impl Iterator<Item = &ModuleInfo> {
        self.modules
            .iter()
            .filter(|m| m.module_type == ModuleType::Wasm)
    }

    fn size(&self) -> usize {
        self.modules.iter().map(|m| m.content.len()).sum()
    }
}

/// Splits modules into the runtime chunk, cache group chunks and `main`
pub struct ChunkPartitioner {
    groups: Vec<CacheGroup>,
    config: PartitionConfig,
}

impl ChunkPartitioner {
    pub fn new(config: PartitionConfig) -> Self {
        Self {
            groups: Vec::new(),
            config,
        }
    }

    /// Register the framework cache group for a closure
    pub fn with_framework_group(self, predicate: FrameworkChunkPredicate) -> Self {
        self.with_group(CacheGroup::framework(predicate))
    }

    pub fn with_group(mut self, group: CacheGroup) -> Self {
        self.groups.push(group);
        // Stable sort keeps registration order among equal priorities
        self.groups.sort_by(|a, b| b.priority.cmp(&a.priority));
        self
    }

    pub fn cache_groups(&self) -> &[CacheGroup] {
        &self.groups
    }

    /// Name of the chunk a module path lands in
    pub fn classify(&self, module_path: &Path) -> &str {
        self.groups
            .iter()
            .find(|g| g.matches(module_path))
            .map(|g| g.name.as_str())
            .unwrap_or(MAIN_CHUNK)
    }

    /// Partition modules into chunks, in load order: runtime, cache groups
    /// by priority, then main. Modules inside a chunk are ordered by id so the
    /// rendered output does not depend on classification order.
    pub fn partition(&self, modules: &[ModuleInfo], entries: &[String]) -> Vec<ChunkPlan> {
        let assignments: Vec<(&str, &ModuleInfo)> = modules
            .par_iter()
            .map(|module| (self.classify(&module.path), module))
            .collect();

        let mut by_chunk: HashMap<&str, BTreeMap<&str, &ModuleInfo>> = HashMap::new();
        for (chunk, module) in assignments {
            by_chunk.entry(chunk).or_default().insert(module.id.as_str(), module);
        }

        let mut chunks = vec![ChunkPlan {
            name: RUNTIME_CHUNK.to_string(),
            kind: ChunkKind::Runtime,
            eager: true,
            modules: Vec::new(),
            entries: Vec::new(),
        }];

        for group in &self.groups {
            if let Some(members) = by_chunk.remove(group.name.as_str()) {
                let plan = ChunkPlan {
                    name: group.name.clone(),
                    kind: ChunkKind::Group,
                    eager: group.enforce,
                    modules: members.into_values().cloned().collect(),
                    entries: Vec::new(),
                };
                if group.enforce {
                    chunks.push(plan);
                } else {
                    chunks.extend(self.split_large_chunk(plan));
                }
            }
        }

        let main_modules: Vec<ModuleInfo> = by_chunk
            .remove(MAIN_CHUNK)
            .map(|members| members.into_values().cloned().collect())
            .unwrap_or_default();

        let main = ChunkPlan {
            name: MAIN_CHUNK.to_string(),
            kind: ChunkKind::Main,
            eager: true,
            modules: main_modules,
            entries: Vec::new(),
        };
        let mut main_parts = self.split_large_chunk(main);

        // Entries run from the last main part so every part is installed first
        if let Some(last) = main_parts.last_mut() {
            last.entries = entries.to_vec();
        }
        chunks.extend(main_parts);

        chunks
    }

    fn split_large_chunk(&self, chunk: ChunkPlan) -> Vec<ChunkPlan> {
        let max = match self.config.max_chunk_size {
            Some(max) if chunk.size() > max => max,
            _ => return vec![chunk],
        };

        let mut parts: Vec<ChunkPlan> = Vec::new();
        let mut current: Vec<ModuleInfo> = Vec::new();
        let mut current_size = 0;

        for module in chunk.modules {
            let size = module.content.len();
            if current_size + size > max && !current.is_empty() {
                parts.push(ChunkPlan {
                    name: format!("{}-{}", chunk.name, parts.len()),
                    kind: chunk.kind,
                    eager: chunk.eager,
                    modules: std::mem::take(&mut current),
                    entries: Vec::new(),
                });
                current_size = 0;
            }
            current.push(module);
            current_size += size;
        }

        if !current.is_empty() {
            parts.push(ChunkPlan {
                name: format!("{}-{}", chunk.name, parts.len()),
                kind: chunk.kind,
                eager: chunk.eager,
                modules: current,
                entries: Vec::new(),
            });
        }

        parts
    }
}

/// Module loader installed by the runtime chunk. Constant text, so the
/// runtime chunk hash never moves with application changes.
pub fn runtime_bootstrap() -> &'static str {
    r#"(function () {
  var factories = {};
  var instances = {};
  function require(id) {
    var cached = instances[id];
    if (cached) return cached.exports;
    var factory = factories[id];
    if (!factory) throw new Error("Module not found: " + id);
    var module = (instances[id] = { id: id, exports: {} });
    factory.call(module.exports, module, module.exports, require);
    return module.exports;
  }
  function install(data) {
    var more = data[1];
    for (var id in more) {
      if (Object.prototype.hasOwnProperty.call(more, id)) factories[id] = more[id];
    }
    (data[2] || []).forEach(require);
  }
  function hotUpdate(chunk, more, removed) {
    (removed || []).forEach(function (id) {
      delete factories[id];
      delete instances[id];
    });
    for (var id in more) {
      if (Object.prototype.hasOwnProperty.call(more, id)) {
        factories[id] = more[id];
        delete instances[id];
      }
    }
  }
  var queue = (self.bedrockChunks = self.bedrockChunks || []);
  queue.forEach(install);
  queue.push = function (data) {
    Array.prototype.push.call(queue, data);
    install(data);
  };
  self.bedrockHotUpdate = hotUpdate;
})();
"#
}

/// Render a chunk as a registry push of module factories. `wasm_urls` maps
/// WASM module ids to their emitted file names.
pub fn render_chunk(chunk: &ChunkPlan, wasm_urls: &HashMap<String, String>) -> String {
    if chunk.kind == ChunkKind::Runtime {
        return runtime_bootstrap().to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "(self.bedrockChunks = self.bedrockChunks || []).push([[{}], {{\n",
        js_string(&chunk.name)
    ));
    out.push_str(&render_factories(chunk.script_modules(), wasm_urls));
    out.push('}');

    if !chunk.entries.is_empty() {
        let entries = chunk
            .entries
            .iter()
            .map(|e| js_string(e))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!(", [{}]", entries));
    }

    out.push_str("]);\n");
    out
}

/// Render a hot-update patch containing only changed modules
pub fn render_hot_update<'a>(
    chunk_name: &str,
    changed: impl Iterator<Item = &'a ModuleInfo>,
    removed: &[String],
    wasm_urls: &HashMap<String, String>,
) -> String {
    let removed = removed
        .iter()
        .map(|id| js_string(id))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "self.bedrockHotUpdate({}, {{\n{}}}, [{}]);\n",
        js_string(chunk_name),
        render_factories(changed, wasm_urls),
        removed
    )
}

fn render_factories<'a>(
    modules: impl Iterator<Item = &'a ModuleInfo>,
    wasm_urls: &HashMap<String, String>,
) -> String {
    let mut out = String::new();
    for module in modules {
        out.push_str(&format!(
            "{}: function (module, exports, require) {{\n",
            js_string(&module.id)
        ));
        if module.module_type == ModuleType::Wasm {
            let url = wasm_urls.get(&module.id).cloned().unwrap_or_default();
            out.push_str(&format!(
                "module.exports = new URL({}, document.baseURI).href;\n",
                js_string(&url)
            ));
        } else {
            out.push_str(&module.source());
            out.push('\n');
        }
        out.push_str("},\n");
    }
    out
}

fn js_string(value: &str) -> String {
    // JSON string literals are valid JS string literals
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

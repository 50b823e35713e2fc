use bedrock::core::models::{BuildMode, ModuleInfo};
use bedrock::infrastructure::processors::{
    compute_framework_closure, ChunkPartitioner, FrameworkChunkPredicate, FrameworkClosure,
    PartitionConfig, FRAMEWORK_CHUNK, MAIN_CHUNK, RUNTIME_CHUNK,
};
use std::fs;
use std::path::{Path, PathBuf};

fn package(root: &Path, rel: &str, name: &str, deps: &[&str]) {
    let dir = root.join(rel);
    fs::create_dir_all(&dir).unwrap();
    let deps = deps
        .iter()
        .map(|d| format!("\"{}\": \"*\"", d))
        .collect::<Vec<_>>()
        .join(", ");
    fs::write(
        dir.join("package.json"),
        format!(r#"{{"name": "{}", "version": "1.0.0", "dependencies": {{{}}}}}"#, name, deps),
    )
    .unwrap();
    fs::write(dir.join("index.js"), format!("module.exports = '{}';", name)).unwrap();
}

/// react -> loose-envify -> js-tokens, react-dom -> loose-envify, scheduler
fn react_tree(root: &Path) {
    package(root, "node_modules/react", "react", &["loose-envify"]);
    package(root, "node_modules/loose-envify", "loose-envify", &["js-tokens"]);
    package(root, "node_modules/js-tokens", "js-tokens", &[]);
    package(root, "node_modules/react-dom", "react-dom", &["loose-envify", "scheduler"]);
    package(root, "node_modules/scheduler", "scheduler", &["loose-envify"]);
    package(root, "node_modules/lodash", "lodash", &[]);
}

fn seeds() -> Vec<String> {
    vec!["react".to_string(), "react-dom".to_string()]
}

fn names(root: &Path, paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| {
            p.strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect()
}

#[test]
fn test_react_closure_order_and_membership() {
    let temp = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(temp.path()).unwrap();
    react_tree(&root);

    let closure = compute_framework_closure(BuildMode::Production, &seeds(), &root);

    assert_eq!(
        names(&root, closure.paths()),
        vec![
            "node_modules/react",
            "node_modules/loose-envify",
            "node_modules/js-tokens",
            "node_modules/react-dom",
            "node_modules/scheduler",
        ]
    );
    assert!(!closure.contains_module(&root.join("node_modules/lodash/index.js")));
}

#[test]
fn test_closure_is_recomputed_identically() {
    let temp = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(temp.path()).unwrap();
    react_tree(&root);

    let walker = FrameworkClosure::default();
    assert_eq!(walker.compute(&seeds(), &root), walker.compute(&seeds(), &root));
}

#[test]
fn test_nested_install_wins_over_hoisted() {
    let temp = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(temp.path()).unwrap();
    react_tree(&root);
    package(
        &root,
        "node_modules/react-dom/node_modules/scheduler",
        "scheduler",
        &[],
    );

    let closure = compute_framework_closure(BuildMode::Production, &seeds(), &root);
    let names = names(&root, closure.paths());

    assert!(names.contains(&"node_modules/react-dom/node_modules/scheduler".to_string()));
    assert!(!names.contains(&"node_modules/scheduler".to_string()));
}

#[test]
fn test_missing_and_malformed_packages_are_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(temp.path()).unwrap();
    package(&root, "node_modules/react", "react", &["object-assign", "broken"]);
    fs::create_dir_all(root.join("node_modules/broken")).unwrap();
    fs::write(root.join("node_modules/broken/package.json"), "{ not json").unwrap();

    let closure = compute_framework_closure(BuildMode::Production, &seeds(), &root);
    assert_eq!(names(&root, closure.paths()), vec!["node_modules/react"]);
}

#[test]
fn test_development_has_no_closure() {
    let temp = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(temp.path()).unwrap();
    react_tree(&root);

    assert!(compute_framework_closure(BuildMode::Development, &seeds(), &root).is_empty());
    assert_eq!(
        compute_framework_closure(BuildMode::Analyze, &seeds(), &root).len(),
        5
    );
}

#[test]
fn test_partition_with_real_closure() {
    let temp = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(temp.path()).unwrap();
    react_tree(&root);
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src/main.js"), "require('react');").unwrap();

    let closure = compute_framework_closure(BuildMode::Production, &seeds(), &root);
    let partitioner = ChunkPartitioner::new(PartitionConfig::default())
        .with_framework_group(FrameworkChunkPredicate::new(closure));

    let module = |rel: &str| {
        let path = root.join(rel);
        let content = fs::read(&path).unwrap();
        ModuleInfo::new(&root, path, content)
    };
    let modules = vec![
        module("src/main.js"),
        module("node_modules/react/index.js"),
        module("node_modules/scheduler/index.js"),
        module("node_modules/lodash/index.js"),
    ];

    let chunks = partitioner.partition(&modules, &["src/main.js".to_string()]);
    let layout: Vec<(&str, Vec<&str>)> = chunks
        .iter()
        .map(|c| (c.name.as_str(), c.modules.iter().map(|m| m.id.as_str()).collect()))
        .collect();

    assert_eq!(
        layout,
        vec![
            (RUNTIME_CHUNK, vec![]),
            (
                FRAMEWORK_CHUNK,
                vec!["node_modules/react/index.js", "node_modules/scheduler/index.js"]
            ),
            (
                MAIN_CHUNK,
                vec!["node_modules/lodash/index.js", "src/main.js"]
            ),
        ]
    );
}

use bedrock::cache::{CacheController, CachePolicy, MemoryCacheStorage};
use bedrock::core::interfaces::BuildService;
use bedrock::core::models::{AssetClass, BuildMode};
use bedrock::core::services::{BedrockBuildService, HTML_FILE, MANIFEST_FILE};
use bedrock::infrastructure::{LightningCssProcessor, PassthroughJsProcessor, TokioFileSystemService};
use bedrock::utils::{CliOverrides, ConfigLoader};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn react_app(root: &Path) {
    write(
        root,
        "node_modules/react/package.json",
        r#"{"name":"react","version":"18.2.0","dependencies":{"loose-envify":"^1.1.0"}}"#,
    );
    write(root, "node_modules/react/index.js", "module.exports = {};");
    write(
        root,
        "node_modules/react-dom/package.json",
        r#"{"name":"react-dom","version":"18.2.0","dependencies":{"loose-envify":"^1.1.0","scheduler":"^0.23.0"}}"#,
    );
    write(root, "node_modules/react-dom/index.js", "module.exports = {};");
    write(
        root,
        "node_modules/loose-envify/package.json",
        r#"{"name":"loose-envify","version":"1.4.0"}"#,
    );
    write(root, "node_modules/loose-envify/index.js", "module.exports = 1;");
    write(
        root,
        "node_modules/scheduler/package.json",
        r#"{"name":"scheduler","version":"0.23.0"}"#,
    );
    write(root, "node_modules/scheduler/index.js", "module.exports = 2;");

    write(root, "src/main.jsx", "console.log('hello');");
    write(root, "src/styles/app.css", ".app { color: rebeccapurple; }");
    write(root, "src/math.wasm", "\0asm");
    write(
        root,
        "index.html",
        "<!DOCTYPE html><html><head><title>App</title></head><body></body></html>",
    );
}

fn service(cache: Option<Arc<CacheController>>) -> BedrockBuildService {
    let service = BedrockBuildService::new(
        Arc::new(TokioFileSystemService),
        Arc::new(PassthroughJsProcessor::new()),
        Arc::new(LightningCssProcessor::new(true)),
    );
    match cache {
        Some(cache) => service.with_cache(cache),
        None => service,
    }
}

fn overrides(mode: &str) -> CliOverrides {
    CliOverrides {
        mode: Some(mode.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_production_build_layout() {
    let temp = tempfile::tempdir().unwrap();
    react_app(temp.path());
    let config = ConfigLoader::load(temp.path().to_path_buf(), overrides("production")).unwrap();

    let result = service(None).build(&config).await.unwrap();

    assert_eq!(result.closure.len(), 4);
    let framework = result.asset("framework.js").unwrap();
    assert_eq!(framework.module_count, 4);

    // Every script, style and wasm name is a bare content hash
    for asset in &result.assets {
        let stem = asset.file_name.split('.').next().unwrap();
        assert_eq!(stem.len(), 16, "{}", asset.file_name);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
    }
    let wasm = result.asset("src/math.wasm").unwrap();
    assert!(wasm.file_name.ends_with(".wasm"));
    assert!(String::from_utf8_lossy(&result.asset("main.js").unwrap().content)
        .contains(&wasm.file_name));

    let manifest: BTreeMap<String, String> =
        serde_json::from_str(&fs::read_to_string(config.outdir.join(MANIFEST_FILE)).unwrap())
            .unwrap();
    assert_eq!(manifest.get("framework.js"), Some(&framework.file_name));

    let html = fs::read_to_string(config.outdir.join(HTML_FILE)).unwrap();
    let runtime = html.find(&result.asset("runtime.js").unwrap().file_name).unwrap();
    let framework_tag = html.find(&framework.file_name).unwrap();
    let main = html.find(&result.asset("main.js").unwrap().file_name).unwrap();
    assert!(runtime < framework_tag && framework_tag < main);
    assert!(html.contains("<title>App</title>"));
}

#[tokio::test]
async fn test_identical_inputs_give_identical_names() {
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();
    react_app(first_dir.path());
    react_app(second_dir.path());

    let first_config =
        ConfigLoader::load(first_dir.path().to_path_buf(), overrides("production")).unwrap();
    let second_config =
        ConfigLoader::load(second_dir.path().to_path_buf(), overrides("production")).unwrap();

    let first = service(None).build(&first_config).await.unwrap();
    let second = service(None).build(&second_config).await.unwrap();

    assert_eq!(first.manifest, second.manifest);
}

#[tokio::test]
async fn test_framework_name_survives_app_change() {
    let temp = tempfile::tempdir().unwrap();
    react_app(temp.path());
    let config = ConfigLoader::load(temp.path().to_path_buf(), overrides("production")).unwrap();
    let mut service = service(None);

    let before = service.build(&config).await.unwrap();
    write(temp.path(), "src/main.jsx", "console.log('goodbye');");
    let after = service.build(&config).await.unwrap();

    assert_eq!(before.manifest.get("framework.js"), after.manifest.get("framework.js"));
    assert_eq!(before.manifest.get("runtime.js"), after.manifest.get("runtime.js"));
    assert_ne!(before.manifest.get("main.js"), after.manifest.get("main.js"));
    // Stale hashed files are cleaned out
    assert!(!config
        .outdir
        .join(before.manifest.get("main.js").unwrap())
        .exists());
}

#[tokio::test]
async fn test_development_build_and_hot_update() {
    let temp = tempfile::tempdir().unwrap();
    react_app(temp.path());
    let config = ConfigLoader::load(temp.path().to_path_buf(), overrides("development")).unwrap();
    let mut service = service(None);

    let first = service.build(&config).await.unwrap();
    assert!(first.closure.is_empty());
    assert!(first.asset("framework.js").is_none());
    assert_eq!(first.manifest.get("main.js"), Some("main.js"));
    assert_eq!(first.manifest.get("main.css"), Some("main.css"));

    write(temp.path(), "src/main.jsx", "console.log('hot');");
    let second = service.rebuild(&config).await.unwrap();

    let names: Vec<&str> = second.hot_updates.iter().map(|a| a.file_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            format!("main.{}.hot-update.js", first.build_id),
            format!("{}.runtime.hot-update.json", first.build_id),
        ]
    );
    assert!(second
        .hot_updates
        .iter()
        .any(|a| a.class == AssetClass::HotUpdateManifest));
    for update in &second.hot_updates {
        assert!(config.outdir.join(&update.file_name).is_file());
    }
}

#[tokio::test]
async fn test_persisted_entries_serve_a_fresh_controller() {
    let temp = tempfile::tempdir().unwrap();
    react_app(temp.path());
    let config = ConfigLoader::load(temp.path().to_path_buf(), overrides("development")).unwrap();
    let policy = CachePolicy::for_mode(BuildMode::Development, &config.cache_dir);
    let storage = Arc::new(MemoryCacheStorage::new());

    let first = {
        let cache = Arc::new(CacheController::new(storage.clone(), policy.clone()));
        service(Some(cache)).build(&config).await.unwrap()
    };
    assert_eq!(first.cache_hits, 0);

    // Empty memory layer, same backing store
    let cache = Arc::new(CacheController::new(storage, policy));
    let second = service(Some(cache.clone())).build(&config).await.unwrap();

    // Everything but the raw wasm asset went through a cached stage
    assert_eq!(second.cache_hits, second.assets.len() - 1);
    assert_eq!(first.manifest, second.manifest);
    assert!(cache.stats().persisted_entries > 0);
}

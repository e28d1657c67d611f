use imo_engine::{Host, ImoConfig, JsonFileStore, OverrideEngine, PageContext, ReqwestFetcher};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn engine_on(path: &Path) -> OverrideEngine {
    let page = PageContext {
        hostname: "localhost".to_string(),
        ..Default::default()
    };
    let host = Host::new(
        page,
        Arc::new(JsonFileStore::with_path(path.to_path_buf())),
        Arc::new(ReqwestFetcher::new()),
    );
    OverrideEngine::create(ImoConfig::default(), host)
        .expect("create")
        .into_active()
        .expect("active")
}

#[test]
fn file_store_backs_the_engine() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("overrides.json");

    let writer = engine_on(&path);
    writer.add_override("a", "https://local/a.js").expect("add");
    writer
        .add_scope_override("https://cdn/app/", "b", "4000")
        .expect("add");
    writer.disable_override("a").expect("disable");
    assert!(writer.save_template("dev"));

    let reader = engine_on(&path);
    assert!(reader.is_disabled("a"));
    assert_eq!(
        reader
            .override_map(false)
            .expect("map")
            .scopes
            .get("https://cdn/app/")
            .and_then(|scope| scope.get("b"))
            .cloned(),
        Some("//localhost:4000/b.js".to_string())
    );
    assert_eq!(reader.active_template_name(), Some("dev".to_string()));

    let raw = std::fs::read_to_string(&path).expect("read");
    let parsed: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(parsed["version"], 1);
    assert_eq!(
        parsed["entries"]["import-map-override:a"],
        "https://local/a.js"
    );
}

use super::support::{page, start, start_with_medium};
use imo_engine::{
    EngineEvent, Host, ImoConfig, ImportMap, MapSource, MemoryStore, NullSink, OverrideEngine,
    ReqwestFetcher, Startup,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn imports(pairs: &[(&str, &str)]) -> ImportMap {
    ImportMap {
        imports: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        scopes: BTreeMap::new(),
    }
}

fn page_with_default_map() -> imo_engine::PageContext {
    let mut page = page("localhost");
    page.default_maps = vec![MapSource::inline(
        r#"{"imports":{"a":"https://cdn/a.js"},"scopes":{}}"#,
    )];
    page
}

#[tokio::test]
async fn override_wins_over_default_map() {
    let h = start(ImoConfig::default(), page_with_default_map());

    h.engine
        .add_override("a", "https://local/a.js")
        .expect("add");

    assert_eq!(
        h.engine.override_map(false).expect("override map"),
        imports(&[("a", "https://local/a.js")])
    );
    assert_eq!(
        h.engine.current_page_map().await.expect("current page"),
        imports(&[("a", "https://local/a.js")])
    );
}

#[tokio::test]
async fn disabled_override_leaves_effective_map() {
    let h = start(ImoConfig::default(), page_with_default_map());
    h.engine
        .add_override("a", "https://local/a.js")
        .expect("add");

    h.engine.disable_override("a").expect("disable");

    assert_eq!(h.engine.override_map(false).expect("map"), ImportMap::empty());
    assert_eq!(
        h.engine.override_map(true).expect("map"),
        imports(&[("a", "https://local/a.js")])
    );
    assert_eq!(
        h.engine.next_page_map().await.expect("next page"),
        imports(&[("a", "https://cdn/a.js")])
    );
}

#[test]
fn disabled_records_are_excluded_from_counts() {
    let h = start(ImoConfig::default(), page("localhost"));
    for i in 0..7 {
        h.engine
            .add_override(&format!("m{i}"), &format!("https://local/m{i}.js"))
            .expect("add");
    }
    for i in [1, 4, 6] {
        h.engine.disable_override(&format!("m{i}")).expect("disable");
    }

    let enabled = h.engine.override_map(false).expect("map");
    let all = h.engine.override_map(true).expect("map");
    assert_eq!(enabled.imports.len(), 4);
    assert_eq!(all.imports.len(), 7);
    assert_eq!(h.engine.overrides().len(), 7);
}

#[test]
fn reset_is_idempotent() {
    let h = start(ImoConfig::default(), page("localhost"));
    h.engine.add_override("a", "3000").expect("add");
    h.engine
        .add_scope_override("/app/", "b", "https://local/b.js")
        .expect("add");
    h.engine.disable_override("a").expect("disable");
    h.engine
        .add_external_override("https://maps/extra.json")
        .expect("add external");

    h.engine.reset_overrides();
    let once = (h.engine.overrides(), h.engine.external_overrides(), h.medium.len());
    h.engine.reset_overrides();
    let twice = (h.engine.overrides(), h.engine.external_overrides(), h.medium.len());

    assert_eq!(once, twice);
    assert_eq!(h.medium.len(), 0);
    assert_eq!(h.engine.override_map(false).expect("map"), ImportMap::empty());
    assert!(!h.engine.has_overrides().expect("has"));
}

#[test]
fn template_matches_regardless_of_order() {
    let h = start(ImoConfig::default(), page("localhost"));
    h.engine.add_override("a", "https://local/a.js").expect("add");
    h.engine.add_override("b", "https://local/b.js").expect("add");
    assert!(h.engine.save_template("pair"));

    // Rebuild the live set in the opposite order.
    h.engine.reset_overrides();
    h.engine.add_override("b", "https://local/b.js").expect("add");
    h.engine.add_override("a", "https://local/a.js").expect("add");

    assert_eq!(h.engine.active_template_name(), Some("pair".to_string()));

    h.engine.add_override("a", "https://elsewhere/a.js").expect("add");
    assert_eq!(h.engine.active_template_name(), None);
}

#[test]
fn template_survives_live_mutation() {
    let h = start(ImoConfig::default(), page("localhost"));
    h.engine.add_override("a", "https://local/a.js").expect("add");
    assert!(h.engine.save_template("snap"));

    h.engine.add_override("a", "https://changed/a.js").expect("add");
    h.engine.remove_override("a").expect("remove");

    let saved = h.engine.templates();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].items[0].url, "https://local/a.js");

    assert!(h.engine.apply_template("snap"));
    h.engine.add_override("a", "https://after-apply/a.js").expect("add");
    assert_eq!(h.engine.templates()[0].items[0].url, "https://local/a.js");
}

#[test]
fn domain_guard_blocks_unlisted_hosts() {
    let config = ImoConfig {
        domain_restriction: Some("allowlist:localhost,*.dev.example.com".to_string()),
        ..Default::default()
    };

    for (hostname, active) in [
        ("localhost", true),
        ("app.dev.example.com", true),
        ("www.example.com", false),
    ] {
        let host = Host::new(
            page(hostname),
            Arc::new(MemoryStore::new()),
            Arc::new(ReqwestFetcher::new()),
        )
        .with_sink(Arc::new(NullSink));
        let startup = OverrideEngine::create(config.clone(), host).expect("create");
        assert_eq!(startup.is_active(), active, "{hostname}");
        if let Startup::Disabled(reason) = startup {
            assert!(reason.to_string().contains(hostname));
        }
    }
}

#[test]
fn overrides_persist_across_engines_sharing_a_medium() {
    let medium = Arc::new(MemoryStore::new());
    let first = start_with_medium(ImoConfig::default(), page("localhost"), medium.clone());
    first.engine.add_override("@org/app", "8080").expect("add");
    first.engine.dispose();

    let second = start_with_medium(ImoConfig::default(), page("localhost"), medium);
    assert_eq!(
        second.engine.override_map(false).expect("map"),
        imports(&[("@org/app", "//localhost:8080/org-app.js")])
    );
}

#[tokio::test]
async fn mount_then_dispose_leaves_sink_clean() {
    let medium = Arc::new(MemoryStore::new());
    {
        let seed = start_with_medium(ImoConfig::default(), page("localhost"), medium.clone());
        seed.engine.add_override("a", "https://local/a.js").expect("add");
        seed.engine
            .add_external_override("https://maps/one.json")
            .expect("add external");
    }

    let h = start_with_medium(ImoConfig::default(), page("localhost"), medium);
    let mut events = h.engine.subscribe();
    h.engine.mount().expect("mount");

    let ids: Vec<String> = h.sink.scripts().into_iter().map(|(id, _)| id).collect();
    assert_eq!(
        ids,
        vec![
            "import-map-overrides-external-0".to_string(),
            "import-map-overrides".to_string(),
        ]
    );

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("timely")
        .expect("event");
    assert_eq!(event, EngineEvent::Init);

    h.engine.dispose();
    assert!(h.sink.scripts().is_empty());
}

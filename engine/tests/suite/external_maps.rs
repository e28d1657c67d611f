use super::support::{page, start};
use imo_engine::{ImoConfig, MapSource};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn precedence_is_default_then_external_then_override() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/importmap.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"imports":{"a":"https://cdn/a.js","b":"https://cdn/b.js","c":"https://cdn/c.js"}}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/team-overrides.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"imports":{"b":"./b.js","c":"https://team/c.js"}}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let mut page = page("localhost");
    page.default_maps = vec![MapSource::remote(format!("{}/importmap.json", server.uri()))];
    let h = start(ImoConfig::default(), page);

    h.engine
        .add_external_override(&format!("{}/team-overrides.json", server.uri()))
        .expect("add external");
    h.engine.add_override("c", "https://local/c.js").expect("add");

    let map = h.engine.next_page_map().await.expect("next page");
    assert_eq!(map.imports.get("a"), Some(&"https://cdn/a.js".to_string()));
    assert_eq!(map.imports.get("b"), Some(&format!("{}/b.js", server.uri())));
    assert_eq!(map.imports.get("c"), Some(&"https://local/c.js".to_string()));

    // Cached: neither map is requested again.
    let again = h.engine.next_page_map().await.expect("next page");
    assert_eq!(map, again);
}

#[tokio::test]
async fn failing_external_map_is_isolated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken.json"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let h = start(ImoConfig::default(), page("localhost"));
    let url = format!("{}/broken.json", server.uri());
    h.engine.add_external_override(&url).expect("add external");
    h.engine.add_override("a", "https://local/a.js").expect("add");

    let (first, second) = tokio::join!(h.engine.next_page_map(), h.engine.next_page_map());
    let first = first.expect("next page");
    assert_eq!(first, second.expect("next page"));
    assert_eq!(first.imports.get("a"), Some(&"https://local/a.js".to_string()));

    assert!(!h.engine.is_external_map_valid(&url).await);
    assert_eq!(h.engine.invalid_external_maps(), vec![url]);
}

#[tokio::test]
async fn disabled_external_reference_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/extra.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"imports":{"x":"https://extra/x.js"}}"#),
        )
        .mount(&server)
        .await;

    let h = start(ImoConfig::default(), page("localhost"));
    let url = format!("{}/extra.json", server.uri());
    h.engine.add_external_override(&url).expect("add external");

    let with = h.engine.next_page_map().await.expect("next page");
    assert!(with.imports.contains_key("x"));

    h.engine.disable_external_override(&url).expect("disable");
    let without = h.engine.next_page_map().await.expect("next page");
    assert!(!without.imports.contains_key("x"));
    assert!(h.engine.is_external_map_valid(&url).await);
}

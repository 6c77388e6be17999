use std::collections::BTreeMap;

use wirebox_engine::{
    Engine, EngineError, EngineStatus, FetchRequest, MachineEvent, NetworkConfig,
};

const BROWSER_MAC: &str = "02:00:00:00:00:01";

fn lan_config() -> NetworkConfig {
    NetworkConfig::from_json(
        r#"{
            "machines": [
                {
                    "id": "web",
                    "type": "static_server",
                    "mac": "02:00:00:00:00:02",
                    "ip": "192.168.1.2",
                    "files": {
                        "index.html": "<h1>ok</h1>",
                        "docs": { "readme.txt": "hello" }
                    },
                    "show_directory_listing": true
                },
                {
                    "id": "client",
                    "type": "browser",
                    "mac": "02:00:00:00:00:01",
                    "ip": "192.168.1.1",
                    "target_url": "http://192.168.1.2"
                }
            ],
            "pipelines": [
                {
                    "source_id": "client",
                    "source_port": 0,
                    "destination_id": "web",
                    "destination_port": 0
                }
            ]
        }"#,
    )
    .unwrap()
}

fn running_engine() -> Engine {
    let mut engine = Engine::new(lan_config()).unwrap();
    engine.start(0);
    assert_eq!(engine.status(), EngineStatus::Running);
    engine
}

fn fetch(path: &str, method: &str) -> FetchRequest {
    FetchRequest {
        request_id: 1,
        client_id: format!("session-{BROWSER_MAC}"),
        url: format!("http://192.168.1.2{path}"),
        path: path.to_string(),
        method: method.to_string(),
        headers: BTreeMap::new(),
    }
}

#[test]
fn get_index_returns_200_html() {
    let mut engine = running_engine();
    engine.push_fetch_request(fetch("/index.html", "GET"), 0).unwrap();

    let responses = engine.drain_fetch_responses();
    assert_eq!(responses.len(), 1);
    let response = &responses[0];
    assert!(response.ok);
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"<h1>ok</h1>");
    assert_eq!(
        response.headers.get("content-type").map(String::as_str),
        Some("text/html")
    );
    assert_eq!(
        response.headers.get("content-length").map(String::as_str),
        Some("11")
    );
    assert_eq!(
        response.headers.get("connection").map(String::as_str),
        Some("close")
    );
}

#[test]
fn root_resolves_index_html() {
    let mut engine = running_engine();
    engine.push_fetch_request(fetch("/", "GET"), 0).unwrap();

    let responses = engine.drain_fetch_responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, 200);
    assert_eq!(responses[0].body, b"<h1>ok</h1>");
}

#[test]
fn missing_file_returns_404_page() {
    let mut engine = running_engine();
    engine.push_fetch_request(fetch("/missing.html", "GET"), 0).unwrap();

    let responses = engine.drain_fetch_responses();
    assert_eq!(responses.len(), 1);
    let response = &responses[0];
    assert!(!response.ok);
    assert_eq!(response.status, 404);
    assert!(String::from_utf8_lossy(&response.body).contains("404"));
}

#[test]
fn head_gets_headers_without_body() {
    let mut engine = running_engine();
    engine.push_fetch_request(fetch("/index.html", "HEAD"), 0).unwrap();

    let responses = engine.drain_fetch_responses();
    assert_eq!(responses.len(), 1);
    let response = &responses[0];
    assert_eq!(response.status, 200);
    assert!(response.body.is_empty());
    assert_eq!(
        response.headers.get("content-length").map(String::as_str),
        Some("11")
    );
}

#[test]
fn post_is_method_not_allowed() {
    let mut engine = running_engine();
    engine.push_fetch_request(fetch("/index.html", "POST"), 0).unwrap();

    let responses = engine.drain_fetch_responses();
    assert_eq!(responses.len(), 1);
    let response = &responses[0];
    assert_eq!(response.status, 405);
    assert_eq!(response.headers.get("allow").map(String::as_str), Some("GET, HEAD"));
    assert!(String::from_utf8_lossy(&response.body).contains("405"));
}

#[test]
fn directory_without_slash_redirects() {
    let mut engine = running_engine();
    engine.push_fetch_request(fetch("/docs", "GET"), 0).unwrap();

    let responses = engine.drain_fetch_responses();
    assert_eq!(responses.len(), 1);
    let response = &responses[0];
    assert_eq!(response.status, 301);
    assert_eq!(
        response.headers.get("location").map(String::as_str),
        Some("/docs/")
    );
}

#[test]
fn directory_listing_names_entries() {
    let mut engine = running_engine();
    engine.push_fetch_request(fetch("/docs/", "GET"), 0).unwrap();

    let responses = engine.drain_fetch_responses();
    assert_eq!(responses.len(), 1);
    let response = &responses[0];
    assert_eq!(response.status, 200);
    let body = String::from_utf8_lossy(&response.body);
    assert!(body.contains("Index of /docs"));
    assert!(body.contains("readme.txt"));
}

#[test]
fn escaping_paths_are_forbidden() {
    let mut engine = running_engine();
    engine
        .push_fetch_request(fetch("/../secrets.txt", "GET"), 0)
        .unwrap();

    let responses = engine.drain_fetch_responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, 403);
}

#[test]
fn browser_ignores_foreign_client_ids() {
    let mut engine = running_engine();
    let mut request = fetch("/index.html", "GET");
    request.client_id = "session-02:99:99:99:99:99".to_string();
    engine.push_fetch_request(request, 0).unwrap();

    engine.tick(100);
    assert!(engine.drain_fetch_responses().is_empty());
}

#[test]
fn unreachable_target_fails_after_arp_timeout() {
    let mut engine = running_engine();
    engine
        .send_event_to_machine(
            "client",
            MachineEvent::UpdateDomain {
                url: "http://192.168.1.99".to_string(),
            },
            0,
        )
        .unwrap();
    engine.push_fetch_request(fetch("/index.html", "GET"), 0).unwrap();
    assert!(engine.drain_fetch_responses().is_empty());

    engine.tick(4_999);
    assert!(engine.drain_fetch_responses().is_empty());

    engine.tick(5_000);
    let responses = engine.drain_fetch_responses();
    assert_eq!(responses.len(), 1);
    let response = &responses[0];
    assert!(!response.ok);
    assert_eq!(
        response.error.as_deref(),
        Some("address resolution timed out")
    );
}

#[test]
fn lifecycle_and_logs() {
    let mut engine = Engine::new(lan_config()).unwrap();
    assert_eq!(engine.status(), EngineStatus::Stopped);
    assert!(matches!(
        engine.push_fetch_request(fetch("/", "GET"), 0),
        Err(EngineError::NotRunning)
    ));

    engine.start(0);
    engine.push_fetch_request(fetch("/index.html", "GET"), 5).unwrap();
    assert!(engine
        .machine_logs("web")
        .unwrap()
        .iter()
        .any(|r| r.message.contains("GET /index.html -> 200")));
    assert!(engine
        .machine_logs("client")
        .unwrap()
        .iter()
        .any(|r| r.message.contains("fetch 1")));
    assert!(!engine.engine_logs().is_empty());

    engine.stop(10);
    assert_eq!(engine.status(), EngineStatus::Stopped);
    assert!(matches!(
        engine.send_event_to_machine("web", MachineEvent::SendInput { line: "x".into() }, 11),
        Err(EngineError::NotRunning)
    ));

    // Restart rebuilds the machines from configuration.
    engine.start(20);
    engine.push_fetch_request(fetch("/index.html", "GET"), 21).unwrap();
    assert_eq!(engine.drain_fetch_responses().len(), 2);
}

#[test]
fn events_to_unknown_machines_are_errors() {
    let mut engine = running_engine();
    assert!(matches!(
        engine.send_event_to_machine(
            "ghost",
            MachineEvent::SendInput { line: "hi".into() },
            0
        ),
        Err(EngineError::UnknownMachine(_))
    ));
}

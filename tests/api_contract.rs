#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! API Contract Tests
//!
//! Browser clients and show-control scripts depend on the HTTP surface.
//! The golden file at tests/fixtures/api_routes.txt is the source of truth.
//!
//! If this test fails:
//! 1. Review the route changes carefully
//! 2. Update api_routes.txt if the change is intentional
//!
//! Run with: cargo test --test api_contract

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use midi_cue_hub::adapters::SilentOutput;
use midi_cue_hub::api::{self, AppState};
use midi_cue_hub::broadcaster::BroadcasterMode;
use midi_cue_hub::hub::{Hub, HubConfig};
use midi_cue_hub::scenes::SceneEngine;

fn load_golden_routes() -> BTreeSet<String> {
    let content =
        fs::read_to_string("tests/fixtures/api_routes.txt").expect("Failed to read api_routes.txt");

    content
        .lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .collect()
}

/// Pull `.route("/path", method(handler))` entries out of the router builder
fn extract_routes_from_source() -> BTreeSet<String> {
    let content = fs::read_to_string("src/api/mod.rs").expect("Failed to read api/mod.rs");

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("//"))
        .filter_map(|line| {
            let start = line.find(".route(\"")?;
            let rest = &line[start + 8..];
            let path = &rest[..rest.find('"')?];
            let handler = &rest[rest.find('"')? + 1..];
            let method = ["get", "post", "put", "delete"]
                .into_iter()
                .find(|m| handler.contains(&format!("{m}(")))?;
            Some(format!("{} {}", method.to_uppercase(), path))
        })
        .collect()
}

#[test]
fn api_routes_match_contract() {
    let golden = load_golden_routes();
    let actual = extract_routes_from_source();

    let added: Vec<_> = actual.difference(&golden).collect();
    let removed: Vec<_> = golden.difference(&actual).collect();

    if !added.is_empty() || !removed.is_empty() {
        let mut msg = String::from("\n\nAPI CONTRACT VIOLATION!\n\n");
        for route in &added {
            msg.push_str(&format!("  + {} (not in contract)\n", route));
        }
        for route in &removed {
            msg.push_str(&format!("  - {} (missing from router)\n", route));
        }
        msg.push_str("\nIf intentional: update tests/fixtures/api_routes.txt\n");
        panic!("{}", msg);
    }
}

#[test]
fn golden_file_is_sorted() {
    let content =
        fs::read_to_string("tests/fixtures/api_routes.txt").expect("Failed to read api_routes.txt");

    let routes: Vec<_> = content
        .lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .collect();

    let mut sorted = routes.clone();
    sorted.sort();

    assert_eq!(
        routes, sorted,
        "api_routes.txt is not sorted! Please sort alphabetically."
    );
}

/// Every contracted route must be answered by the live router, not the
/// static-file fallback
#[tokio::test]
async fn contract_routes_are_served() {
    let engine = SceneEngine::from_scenes("tests/fixtures/missing-scenes.json", Vec::new());
    let hub = Hub::new(
        HubConfig::default(),
        Arc::new(engine),
        BroadcasterMode::Default.build(Duration::from_millis(50)),
        Arc::new(SilentOutput),
        CancellationToken::new(),
    );
    let empty_static = tempfile::tempdir().unwrap();
    let app = api::router(AppState::new(hub.handle()), empty_static.path());

    for route in load_golden_routes() {
        let (method, path) = route.split_once(' ').unwrap();
        let request = Request::builder()
            .method(Method::from_bytes(method.as_bytes()).unwrap())
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_ne!(
            response.status(),
            StatusCode::NOT_FOUND,
            "{} fell through to the static fallback",
            route
        );
        assert_ne!(
            response.status(),
            StatusCode::METHOD_NOT_ALLOWED,
            "{} rejected its contracted method",
            route
        );
    }
}

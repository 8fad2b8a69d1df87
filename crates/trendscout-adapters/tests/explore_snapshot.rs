use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use trendscout_adapters::{
    extract_explore_sightings, extract_post_metrics, ExtractionError, FixtureSession, PageSession,
};
use trendscout_core::{PostMetrics, TagSighting};

#[derive(Debug, Deserialize)]
struct Snapshot {
    sightings: Vec<TagSighting>,
    posts: BTreeMap<String, PostMetrics>,
    unreadable_posts: Vec<String>,
}

fn fixture_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/instagram")
        .canonicalize()
        .expect("fixture root")
}

fn read_snapshot() -> Snapshot {
    let text = fs::read_to_string(fixture_root().join("snapshot.json")).expect("read snapshot");
    serde_json::from_str(&text).expect("parse snapshot")
}

#[test]
fn explore_fixture_matches_golden_sightings() {
    let html = fs::read_to_string(fixture_root().join("explore.html")).expect("explore fixture");
    let expected = read_snapshot();

    let sightings = extract_explore_sightings(&html, 400).expect("extract");
    assert_eq!(sightings, expected.sightings);
}

#[test]
fn explore_scan_stops_at_posts_to_scan() {
    let html = fs::read_to_string(fixture_root().join("explore.html")).expect("explore fixture");

    let sightings = extract_explore_sightings(&html, 2).expect("extract");
    assert!(sightings.iter().all(|s| s.post_id == "/p/C1sunset01/" || s.post_id == "/p/C2foodie02/"));
    assert_eq!(sightings.len(), 8);
}

#[tokio::test]
async fn post_fixtures_match_golden_metrics() {
    let expected = read_snapshot();
    let session = FixtureSession::new(fixture_root());

    for (code, metrics) in &expected.posts {
        let page = session.post(&format!("/p/{code}/")).await.expect("post fixture");
        assert_eq!(&extract_post_metrics(&page.html).expect("metrics"), metrics, "post {code}");
    }
    for code in &expected.unreadable_posts {
        let page = session.post(&format!("/p/{code}/")).await.expect("post fixture");
        assert_eq!(extract_post_metrics(&page.html), Err(ExtractionError::MissingLikes));
    }
}

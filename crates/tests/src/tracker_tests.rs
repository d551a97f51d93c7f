//! Check passes, readiness and remote directory ingestion.

use std::time::Duration;

use crate::mock_infrastructure::{directory_entry, home_page, offline_config, MirrorMockBuilder};
use serde_json::{json, Value};
use switcher_core::{
    upstream::{InstanceTracker, InstanceTrackerBuilder},
    SwitcherConfig, UpstreamError,
};

fn build_tracker(config: SwitcherConfig) -> InstanceTracker {
    InstanceTrackerBuilder::new().config(config).build().unwrap()
}

fn fetching_config(directory_url: String) -> SwitcherConfig {
    let mut config = offline_config(&[]);
    config.fetch.enabled = true;
    config.fetch.url = directory_url;
    config.fetch.require_version.enabled = true;
    config.fetch.require_version.version = "0.20.0".to_string();
    config
}

#[tokio::test]
async fn test_check_all_and_recheck_dead() {
    let mut up = MirrorMockBuilder::new().await;
    up.mock_stats(200);
    let mut down = MirrorMockBuilder::new().await;
    down.mock_stats(503);

    let mut config = offline_config(&[up.url(), down.url()]);
    config.switching.only_working = true;
    let tracker = build_tracker(config);
    tracker.load_config();

    assert!(tracker.get_working_instances().is_empty());
    assert!(tracker.check_all().await);

    let working = tracker.get_working_instances();
    assert_eq!(working.len(), 1);
    assert_eq!(working[0].site(), up.url());

    // Only the dead instance is probed again
    assert!(tracker.check_recommended().await);
    assert_eq!(tracker.get_instance(&up.url()).unwrap().record_count(), 1);
    assert_eq!(tracker.get_instance(&down.url()).unwrap().record_count(), 2);
}

#[tokio::test]
async fn test_sequential_check_pass() {
    let mut first = MirrorMockBuilder::new().await;
    first.mock_stats(200);
    let mut second = MirrorMockBuilder::new().await;
    second.mock_stats(200);

    let mut config = offline_config(&[first.url(), second.url()]);
    config.tracking.parallel = false;
    let tracker = build_tracker(config);
    tracker.load_config();

    assert!(tracker.check_all().await);
    assert!(tracker.get_all_instances().iter().all(|instance| instance.is_working()));
}

#[tokio::test]
async fn test_init_runs_first_pass_before_ready() {
    let mut up = MirrorMockBuilder::new().await;
    up.mock_stats(200);
    let mut down = MirrorMockBuilder::new().await;
    down.mock_stats(500);

    let mut config = offline_config(&[up.url(), down.url()]);
    config.tracking.enabled = true;
    config.switching.only_working = true;
    let tracker = build_tracker(config);

    tokio::time::timeout(Duration::from_secs(5), tracker.init()).await.unwrap();
    assert!(tracker.is_ready());

    let statuses = tracker.statuses();
    assert_eq!(statuses.len(), 2);
    assert!(statuses[0].working);
    assert!(!statuses[1].working);
    assert_eq!(statuses[0].records, 1);

    assert_eq!(tracker.get_next_instance().unwrap().site(), up.url());
    assert_eq!(tracker.get_fastest_instance().unwrap().site(), up.url());

    tokio::time::timeout(Duration::from_secs(1), tracker.shutdown()).await.unwrap();
}

#[tokio::test]
async fn test_remote_directory_filtering() {
    let mut current = MirrorMockBuilder::new().await;
    current.mock_stats(200);
    let mut unstated_new = MirrorMockBuilder::new().await;
    unstated_new.mock_home_page(200, &home_page("2.20240825.2-5e8c5d2"));
    let mut unstated_old = MirrorMockBuilder::new().await;
    unstated_old.mock_home_page(200, &home_page("0.19.1-abcdef0"));
    let mut unreachable = MirrorMockBuilder::new().await;
    unreachable.mock_home_page(502, "bad gateway");

    let onion: Value = json!([
        "abc.onion",
        { "type": "onion", "uri": "http://abc.onion", "monitor": null }
    ]);
    let entries = json!([
        directory_entry(&current.url(), Some("0.20.1"), "99.5"),
        directory_entry("https://old.example.org", Some("0.19.2"), "99.5"),
        directory_entry("https://dead.example.org", Some("0.20.1"), "0"),
        directory_entry(&unstated_new.url(), None, "98"),
        directory_entry(&unstated_old.url(), None, "98"),
        directory_entry(&unreachable.url(), None, "98"),
        onion,
    ]);

    let mut directory = MirrorMockBuilder::new().await;
    directory.mock_directory(&entries);

    let tracker = build_tracker(fetching_config(directory.directory_url()));
    let added = tracker.load_remote().await.unwrap();
    assert_eq!(added, 2);

    let sites: Vec<String> =
        tracker.get_all_instances().iter().map(|i| i.site().to_string()).collect();
    assert_eq!(sites.len(), 2);
    assert!(sites.contains(&current.url()));
    assert!(sites.contains(&unstated_new.url()));

    // Confirmed from its home page, so it is released for selection
    let probed = tracker.get_instance(&unstated_new.url()).unwrap();
    assert!(probed.is_available());
    assert!(probed.is_working());

    let stated = tracker.get_instance(&current.url()).unwrap();
    assert!(stated.is_available());
    assert_eq!(stated.record_count(), 0);
}

#[tokio::test]
async fn test_remote_directory_without_version_enforcement() {
    let entries = json!([
        directory_entry("https://a.example.org", Some("0.1.0"), "50"),
        directory_entry("https://b.example.org/", None, "0"),
    ]);
    let mut directory = MirrorMockBuilder::new().await;
    directory.mock_directory(&entries);

    let mut config = fetching_config(directory.directory_url());
    config.fetch.require_version.enabled = false;
    config.fetch.ignore_dead = false;
    let tracker = build_tracker(config);

    assert_eq!(tracker.load_remote().await.unwrap(), 2);
    assert!(tracker.get_instance("https://b.example.org").is_some());
}

#[tokio::test]
async fn test_remote_directory_skips_configured_instances() {
    let entries = json!([directory_entry("https://a.example.org/", Some("1.0.0"), "99")]);
    let mut directory = MirrorMockBuilder::new().await;
    directory.mock_directory(&entries);

    let mut config = fetching_config(directory.directory_url());
    config.instances = offline_config(&["https://a.example.org".to_string()]).instances;
    let tracker = build_tracker(config);

    assert_eq!(tracker.load_config(), 1);
    assert_eq!(tracker.load_remote().await.unwrap(), 0);
    assert_eq!(tracker.get_all_instances().len(), 1);
}

#[tokio::test]
async fn test_remote_directory_errors() {
    let mut directory = MirrorMockBuilder::new().await;
    directory.mock_directory_raw(200, r#"{"instances": []}"#);
    let tracker = build_tracker(fetching_config(directory.directory_url()));
    assert!(matches!(tracker.load_remote().await, Err(UpstreamError::InvalidPayload(_))));

    let mut directory = MirrorMockBuilder::new().await;
    directory.mock_directory_raw(503, "maintenance");
    let tracker = build_tracker(fetching_config(directory.directory_url()));
    assert!(matches!(tracker.load_remote().await, Err(UpstreamError::HttpError(503, _))));
}

#[tokio::test]
async fn test_ready_fires_when_directory_fails() {
    let mut directory = MirrorMockBuilder::new().await;
    directory.mock_directory_raw(500, "down");

    let mut config = fetching_config(directory.directory_url());
    config.instances = offline_config(&["https://a.example.org".to_string()]).instances;
    let tracker = build_tracker(config);
    let mut ready = tracker.subscribe_ready();

    tokio::time::timeout(Duration::from_secs(5), tracker.init()).await.unwrap();
    assert!(*ready.borrow_and_update());
    assert_eq!(tracker.get_all_instances().len(), 1);
}

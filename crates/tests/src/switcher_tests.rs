//! Failover, selection policies and cancellation through the dispatcher.

use std::time::Duration;

use crate::mock_infrastructure::{
    channel_json, offline_config, unavailable_json, video_json, MirrorMockBuilder,
};
use serde_json::json;
use switcher_core::{
    upstream::instance::{channel_latest_path, channel_videos_path},
    RequestKind, Switcher, SwitcherConfig, SwitcherError, UpstreamError,
};
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

fn tracked_config(sites: &[String]) -> SwitcherConfig {
    let mut config = offline_config(sites);
    config.tracking.enabled = true;
    config.switching.only_working = true;
    config
}

#[tokio::test]
async fn test_failover_after_one_failed_attempt() {
    let mut failing = MirrorMockBuilder::new().await;
    let failed = failing.expect_video("abc", 503, &json!({}), 1);
    let mut healthy = MirrorMockBuilder::new().await;
    let answered = healthy.expect_video("abc", 200, &video_json("abc"), 1);

    let switcher = Switcher::new(offline_config(&[failing.url(), healthy.url()])).unwrap();

    let response = tokio::time::timeout(TIMEOUT, switcher.request_video("abc")).await.unwrap();
    assert_eq!(response.unwrap().value()["videoId"], "abc");

    failed.assert();
    answered.assert();
    assert!(!switcher.tracker().get_instance(&failing.url()).unwrap().is_working());
    switcher.shutdown().await;
}

#[tokio::test]
async fn test_prefer_same_keeps_working_instance() {
    let mut first = MirrorMockBuilder::new().await;
    first.mock_stats(200);
    let first_hits = first.expect_video("abc", 200, &video_json("abc"), 3);
    let mut second = MirrorMockBuilder::new().await;
    second.mock_stats(200);
    let second_hits = second.expect_video("abc", 200, &video_json("abc"), 0);

    let mut config = tracked_config(&[first.url(), second.url()]);
    config.switching.prefer_same = true;
    let switcher = Switcher::new(config).unwrap();

    for _ in 0..3 {
        tokio::time::timeout(TIMEOUT, switcher.request_video("abc")).await.unwrap().unwrap();
    }

    first_hits.assert();
    second_hits.assert();
    switcher.shutdown().await;
}

#[tokio::test]
async fn test_round_robin_without_prefer_same() {
    let mut first = MirrorMockBuilder::new().await;
    let first_hits = first.expect_video("abc", 200, &video_json("abc"), 2);
    let mut second = MirrorMockBuilder::new().await;
    let second_hits = second.expect_video("abc", 200, &video_json("abc"), 2);

    let switcher = Switcher::new(offline_config(&[first.url(), second.url()])).unwrap();

    for _ in 0..4 {
        tokio::time::timeout(TIMEOUT, switcher.request_video("abc")).await.unwrap().unwrap();
    }

    first_hits.assert();
    second_hits.assert();
    switcher.shutdown().await;
}

#[tokio::test]
async fn test_blacklisted_instance_is_not_retried_for_that_kind() {
    let mut refusing = MirrorMockBuilder::new().await;
    let refused = refusing.expect_video("abc", 403, &json!({}), 1);
    refusing.mock_channel("UC1", 200, &channel_json("UC1"));
    let mut healthy = MirrorMockBuilder::new().await;
    let answered = healthy.expect_video("abc", 200, &video_json("abc"), 3);

    let mut config = offline_config(&[refusing.url(), healthy.url()]);
    config.switching.prefer_same = true;
    let switcher = Switcher::new(config).unwrap();

    for _ in 0..3 {
        tokio::time::timeout(TIMEOUT, switcher.request_video("abc")).await.unwrap().unwrap();
    }

    refused.assert();
    answered.assert();

    let refusing_instance = switcher.tracker().get_instance(&refusing.url()).unwrap();
    assert!(refusing_instance.is_blacklisted(&RequestKind::Video));
    assert!(!refusing_instance.is_blacklisted(&RequestKind::Channel));
    switcher.shutdown().await;
}

#[tokio::test]
async fn test_unavailable_resource_is_returned_without_retry() {
    let mut mirror = MirrorMockBuilder::new().await;
    let hits = mirror.expect_video("gone", 500, &unavailable_json(), 1);

    let switcher = Switcher::new(offline_config(&[mirror.url()])).unwrap();

    let response =
        tokio::time::timeout(TIMEOUT, switcher.request_video("gone")).await.unwrap().unwrap();
    assert!(response.is_resource_unavailable());
    hits.assert();
    switcher.shutdown().await;
}

#[tokio::test]
async fn test_no_working_instances_reaches_caller() {
    let mut down = MirrorMockBuilder::new().await;
    down.mock_stats(503);
    let untouched = down.expect_video("abc", 200, &video_json("abc"), 0);

    let switcher = Switcher::new(tracked_config(&[down.url()])).unwrap();

    let result = tokio::time::timeout(TIMEOUT, switcher.request_video("abc")).await.unwrap();
    assert!(matches!(result, Err(SwitcherError::Upstream(UpstreamError::NoWorkingInstances))));
    untouched.assert();
    switcher.shutdown().await;
}

#[tokio::test]
async fn test_requests_wait_for_first_check_pass() {
    let mut mirror = MirrorMockBuilder::new().await;
    mirror.mock_stats(200).mock_video("abc", 200, &video_json("abc"));

    let switcher = Switcher::new(tracked_config(&[mirror.url()])).unwrap();

    // Issued immediately; with only working instances selectable this succeeds only after the
    // initial pass has marked the mirror as working
    let response = tokio::time::timeout(TIMEOUT, switcher.request_video("abc")).await.unwrap();
    assert!(response.is_ok());
    assert!(switcher.is_ready());
    switcher.shutdown().await;
}

#[tokio::test]
async fn test_channel_requests() {
    let mut mirror = MirrorMockBuilder::new().await;
    mirror
        .mock_channel("UC1", 200, &channel_json("UC1"))
        .mock_json(&channel_videos_path("UC1"), 200, &json!({ "videos": [] }))
        .mock_json(&channel_latest_path("UC1"), 200, &json!([]));

    let switcher = Switcher::new(offline_config(&[mirror.url()])).unwrap();
    let mut records = switcher.subscribe_records();

    let channel = switcher.request_channel("UC1").await.unwrap();
    assert_eq!(channel.value()["authorId"], "UC1");
    let videos = switcher.request_channel_videos("UC1").await.unwrap();
    assert!(videos.value()["videos"].is_array());
    let latest = switcher.request_channel_latest("UC1").await.unwrap();
    assert!(latest.value().is_array());

    for _ in 0..3 {
        let event = records.recv().await.unwrap();
        assert_eq!(event.method, "channel");
        assert!(event.working);
    }
    switcher.shutdown().await;
}

#[tokio::test]
async fn test_custom_request_kind() {
    let mut mirror = MirrorMockBuilder::new().await;
    mirror.mock_json("/api/v1/search", 403, &json!({}));
    mirror.mock_json("/api/v1/trending", 200, &json!([]));

    let mut config = offline_config(&[mirror.url()]);
    config.switching.only_working = true;
    let switcher = Switcher::new(config).unwrap();
    switcher.wait_for_ready().await;

    // Nothing has been probed yet, so nothing is selectable
    let kind = RequestKind::custom("search");
    let result = switcher.request(kind.clone(), "/api/v1/search").await;
    assert!(matches!(result, Err(SwitcherError::Upstream(UpstreamError::NoWorkingInstances))));

    let instance = switcher.tracker().get_instance(&mirror.url()).unwrap();
    let trending = instance.make_api_request(RequestKind::custom("trending"), "/api/v1/trending");
    assert!(trending.await.is_ok());

    let refused = instance.make_api_request(kind.clone(), "/api/v1/search").await;
    assert!(matches!(refused, Err(UpstreamError::HttpError(403, _))));
    assert!(instance.is_blacklisted(&kind));

    // The only instance refuses this kind, so the dispatcher has no candidate for it
    let result = switcher.request(kind, "/api/v1/search").await;
    assert!(matches!(result, Err(SwitcherError::Upstream(UpstreamError::NoWorkingInstances))));
    switcher.shutdown().await;
}

#[tokio::test]
async fn test_cancel_bounds_endless_failover() {
    let mut failing = MirrorMockBuilder::new().await;
    failing.mock_video("abc", 502, &json!({}));

    let switcher = Switcher::new(offline_config(&[failing.url()])).unwrap();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
    }

    let result = tokio::time::timeout(
        TIMEOUT,
        switcher.request_with_cancel(RequestKind::Video, "/api/v1/videos/abc", &cancel),
    )
    .await
    .unwrap();
    assert!(matches!(result, Err(SwitcherError::Cancelled)));

    let status = &switcher.statuses()[0];
    assert!(status.records > 1);
    assert!(!status.working);
    switcher.shutdown().await;
}

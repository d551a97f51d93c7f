use std::time::Duration;

use clap::ValueEnum;
use switcher_core::{
    upstream::instance::{channel_latest_path, channel_path, channel_videos_path, video_path},
    ApiResponse, RequestKind, Switcher, SwitcherConfig, SwitcherError,
};
use tokio_util::sync::CancellationToken;

use super::utils::{print_info, CliError, CliResult};

/// Which channel listing to fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ChannelView {
    Info,
    Videos,
    Latest,
}

/// A tagged request resolved to its kind and path.
#[derive(Debug, PartialEq, Eq)]
pub struct RequestTarget {
    pub kind: RequestKind,
    pub path: String,
}

impl RequestTarget {
    pub fn video(id: &str) -> Self {
        Self { kind: RequestKind::Video, path: video_path(id) }
    }

    pub fn channel(id: &str, view: ChannelView) -> Self {
        let path = match view {
            ChannelView::Info => channel_path(id),
            ChannelView::Videos => channel_videos_path(id),
            ChannelView::Latest => channel_latest_path(id),
        };
        Self { kind: RequestKind::Channel, path }
    }

    pub fn custom(kind: &str, path: &str) -> Self {
        let kind = match kind {
            "video" => RequestKind::Video,
            "channel" => RequestKind::Channel,
            other => RequestKind::custom(other),
        };
        Self { kind, path: path.to_string() }
    }
}

/// Dispatches one request and prints the JSON answer.
///
/// The dispatcher retries without limit, so the request is cancelled after `timeout_secs`.
pub async fn run_request(
    config: SwitcherConfig,
    target: RequestTarget,
    timeout_secs: u64,
) -> CliResult<()> {
    let switcher = Switcher::new(config)?;

    let cancel = CancellationToken::new();
    let deadline = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
            cancel.cancel();
        })
    };

    print_info(&format!("Requesting {} ({})", target.path, target.kind));
    let result = switcher.request_with_cancel(target.kind, &target.path, &cancel).await;
    deadline.abort();
    switcher.shutdown().await;

    let response = match result {
        Ok(response) => response,
        Err(SwitcherError::Cancelled) => return Err(CliError::Timeout(timeout_secs)),
        Err(e) => return Err(e.into()),
    };

    if let ApiResponse::ResourceUnavailable(_) = response {
        print_info("The instance reported the resource as unavailable");
    }
    println!("{}", serde_json::to_string_pretty(response.value())?);

    Ok(())
}

//! Mirror Mock Builder
//!
//! Wraps mockito to provide the endpoints a mirror exposes: the stats and home probes, the
//! video and channel APIs, the bot-protection cookie redirect, and the remote directory.

use std::time::Duration;

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::Value;
use switcher_core::upstream::instance::{channel_path, video_path, HOME_PATH, STATS_PATH};

/// Path the remote directory is served from.
pub const DIRECTORY_PATH: &str = "/instances.json";

/// Builder for a mock mirror.
///
/// Mocks created through the chaining methods are kept alive for the lifetime of the builder.
/// The `expect_*` methods return the mock so a test can assert its exact hit count.
pub struct MirrorMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl MirrorMockBuilder {
    /// Creates a new mirror with a fresh mockito server.
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    /// Returns the URL of the mock server, usable as an instance site.
    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Returns the URL the remote directory is served from.
    #[must_use]
    pub fn directory_url(&self) -> String {
        format!("{}{DIRECTORY_PATH}", self.server.url())
    }

    fn keep(&mut self, mock: Mock) -> &mut Self {
        self.mocks.push(mock);
        self
    }

    fn json_mock(&mut self, path: &str, status: usize, body: &Value) -> Mock {
        self.server
            .mock("GET", path)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
    }

    /// Mocks the stats probe (`HEAD /api/v1/stats`).
    pub fn mock_stats(&mut self, status: usize) -> &mut Self {
        let mock = self.server.mock("HEAD", STATS_PATH).with_status(status).create();
        self.keep(mock)
    }

    /// Mocks the home probe (`HEAD /feed/trending`).
    pub fn mock_home_probe(&mut self, status: usize) -> &mut Self {
        let mock = self.server.mock("HEAD", HOME_PATH).with_status(status).create();
        self.keep(mock)
    }

    /// Serves `html` as the home page (`GET /feed/trending`).
    pub fn mock_home_page(&mut self, status: usize, html: &str) -> &mut Self {
        let mock = self
            .server
            .mock("GET", HOME_PATH)
            .with_status(status)
            .with_header("content-type", "text/html")
            .with_body(html)
            .create();
        self.keep(mock)
    }

    /// Mocks `GET {path}` with a JSON body.
    pub fn mock_json(&mut self, path: &str, status: usize, body: &Value) -> &mut Self {
        let mock = self.json_mock(path, status, body).create();
        self.keep(mock)
    }

    /// Mocks `GET /api/v1/videos/{id}`.
    pub fn mock_video(&mut self, id: &str, status: usize, body: &Value) -> &mut Self {
        self.mock_json(&video_path(id), status, body)
    }

    /// Mocks `GET /api/v1/channels/{id}`.
    pub fn mock_channel(&mut self, id: &str, status: usize, body: &Value) -> &mut Self {
        self.mock_json(&channel_path(id), status, body)
    }

    /// Mocks `GET /api/v1/videos/{id}` with a raw, non-JSON body.
    pub fn mock_video_raw(&mut self, id: &str, status: usize, body: &str) -> &mut Self {
        let mock = self
            .server
            .mock("GET", video_path(id).as_str())
            .with_status(status)
            .with_header("content-type", "text/html")
            .with_body(body)
            .create();
        self.keep(mock)
    }

    /// Mocks `GET /api/v1/videos/{id}` and expects exactly `hits` requests.
    #[must_use]
    pub fn expect_video(&mut self, id: &str, status: usize, body: &Value, hits: usize) -> Mock {
        self.json_mock(&video_path(id), status, body).expect(hits).create()
    }

    /// Mocks `GET /api/v1/channels/{id}` and expects exactly `hits` requests.
    #[must_use]
    pub fn expect_channel(&mut self, id: &str, status: usize, body: &Value, hits: usize) -> Mock {
        self.json_mock(&channel_path(id), status, body).expect(hits).create()
    }

    /// Puts `path` behind a bot-protection wall.
    ///
    /// A request without the cookie is answered with HTTP 307, a `Set-Cookie` of `cookie` and a
    /// `Location` back to `path`. A request carrying the cookie receives `body`.
    pub fn mock_cookie_wall(&mut self, path: &str, cookie: &str, body: &Value) -> &mut Self {
        self.cookie_wall(path, cookie, body, Some(path), Duration::ZERO)
    }

    /// Like [`Self::mock_cookie_wall`], but the 307 carries no `Location`.
    pub fn mock_cookie_wall_without_location(
        &mut self,
        path: &str,
        cookie: &str,
        body: &Value,
    ) -> &mut Self {
        self.cookie_wall(path, cookie, body, None, Duration::ZERO)
    }

    /// Like [`Self::mock_cookie_wall`], but each of the two responses takes at least `delay`.
    pub fn mock_slow_cookie_wall(
        &mut self,
        path: &str,
        cookie: &str,
        body: &Value,
        delay: Duration,
    ) -> &mut Self {
        self.cookie_wall(path, cookie, body, Some(path), delay)
    }

    fn cookie_wall(
        &mut self,
        path: &str,
        cookie: &str,
        body: &Value,
        location: Option<&str>,
        delay: Duration,
    ) -> &mut Self {
        let mut wall = self
            .server
            .mock("GET", path)
            .match_header("cookie", Matcher::Missing)
            .with_status(307)
            .with_header("set-cookie", &format!("{cookie}; Path=/"));
        if let Some(location) = location {
            wall = wall.with_header("location", location);
        }
        let wall = delayed(wall, delay, String::new()).create();
        self.mocks.push(wall);

        let behind = self
            .server
            .mock("GET", path)
            .match_header("cookie", Matcher::Regex(regex_escape(cookie)))
            .with_status(200)
            .with_header("content-type", "application/json");
        let behind = delayed(behind, delay, body.to_string()).create();
        self.keep(behind)
    }

    /// Serves `entries` as the remote directory.
    pub fn mock_directory(&mut self, entries: &Value) -> &mut Self {
        self.mock_json(DIRECTORY_PATH, 200, entries)
    }

    /// Serves a raw body with `status` as the remote directory.
    pub fn mock_directory_raw(&mut self, status: usize, body: &str) -> &mut Self {
        let mock =
            self.server.mock("GET", DIRECTORY_PATH).with_status(status).with_body(body).create();
        self.keep(mock)
    }
}

/// Serves `body`, holding it back for `delay` first.
fn delayed(mock: Mock, delay: Duration, body: String) -> Mock {
    if delay.is_zero() {
        return mock.with_body(body);
    }
    mock.with_chunked_body(move |w| {
        std::thread::sleep(delay);
        w.write_all(body.as_bytes())
    })
}

fn regex_escape(literal: &str) -> String {
    literal
        .chars()
        .flat_map(|c| {
            let escape = "\\.+*?()|[]{}^$".contains(c);
            escape.then_some('\\').into_iter().chain(std::iter::once(c))
        })
        .collect()
}

//! Version discovery from an instance's rendered home page.
//!
//! The page footer holds a row of parts; the part whose direct children include a GitHub icon
//! (`ion-logo-github`) reads like `Current version: 0.20.1-3a6ee0c @ master`. The version is
//! the first token after the first colon.

use scraper::{ElementRef, Html, Selector};
use semver::{Prerelease, Version};

use super::UpstreamError;

const FOOTER_SELECTOR: &str = ".footer";
const SOURCE_MARKER_CLASS: &str = "ion-logo-github";

fn child_elements<'a>(element: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    element.children().filter_map(ElementRef::wrap)
}

/// Extracts the version token from a home page document.
///
/// # Errors
///
/// Returns [`UpstreamError::VersionNotDetectable`] if the footer, the marker or the token is
/// missing.
pub fn extract_version(html: &str) -> Result<String, UpstreamError> {
    let document = Html::parse_document(html);
    let footer_selector =
        Selector::parse(FOOTER_SELECTOR).map_err(|_| UpstreamError::VersionNotDetectable)?;

    let footer =
        document.select(&footer_selector).next().ok_or(UpstreamError::VersionNotDetectable)?;
    let footer_inner = child_elements(footer).next().ok_or(UpstreamError::VersionNotDetectable)?;

    let version = child_elements(footer_inner)
        .filter(|part| {
            child_elements(*part)
                .any(|child| child.value().classes().any(|c| c == SOURCE_MARKER_CLASS))
        })
        .find_map(|part| version_token(&part.text().collect::<String>()));
    version.ok_or(UpstreamError::VersionNotDetectable)
}

/// First non-blank token after the first colon of the first line.
fn version_token(text: &str) -> Option<String> {
    let line = text.trim().lines().next()?;
    let (_, rest) = line.split_once(':')?;
    rest.split_whitespace().next().map(str::to_string)
}

/// Parses a version string as published by instances.
///
/// Strict semantic versions are accepted as-is. Date-style versions such as `2024.01.09-abc`
/// are not valid semver because of leading zeros, so the numeric core is re-read leniently and
/// any suffix kept as a pre-release tag where possible.
#[must_use]
pub fn parse_version(raw: &str) -> Option<Version> {
    let raw = raw.trim().trim_start_matches('v');
    if let Ok(version) = Version::parse(raw) {
        return Some(version);
    }

    let (core, suffix) = match raw.find(['-', '+']) {
        Some(index) => (&raw[..index], Some(&raw[index + 1..])),
        None => (raw, None),
    };

    let mut numbers = core.split('.');
    let major = numbers.next()?.parse().ok()?;
    let minor = numbers.next().map_or(Some(0), |n| n.parse().ok())?;
    let patch = numbers.next().map_or(Some(0), |n| n.parse().ok())?;
    if numbers.next().is_some() {
        return None;
    }

    let mut version = Version::new(major, minor, patch);
    if let Some(pre) = suffix.and_then(|s| Prerelease::new(s).ok()) {
        version.pre = pre;
    }
    Some(version)
}

/// Returns `true` if `raw` parses and is at least `minimum`. Unparsable versions never qualify.
///
/// Unlike strict semver ordering, only the numeric core is compared, so `0.20.0-3a6ee0c` meets
/// a minimum of `0.20.0`. Instances publish the commit hash in the suffix position; it does not
/// mark a pre-release.
#[must_use]
pub fn meets_minimum(raw: &str, minimum: &Version) -> bool {
    parse_version(raw).is_some_and(|version| {
        (version.major, version.minor, version.patch) >=
            (minimum.major, minimum.minor, minimum.patch)
    })
}

// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! URL watch sets
//!
//! A plugin declares the traffic it cares about as a list of
//! `scheme://host[:port]/path` patterns:
//!
//! - `*` in the path matches a run of characters inside one segment
//! - `*` in the scheme or host matches any run of host text, dots included
//! - `**` as a whole path segment matches zero or more segments
//! - a leading `!` turns the pattern into an exclusion
//!
//! Scheme and host compare case-insensitively, the path case-sensitively.
//! Query strings and fragments are not part of the match. A pattern without
//! a path matches every path on its host, and a pattern without a port
//! matches every port.
//!
//! Patterns are written the way a user types a URL. Each one is compiled
//! into an anchored [`Regex`] after its host goes through IDNA and its path
//! through the same percent-encoding `url` applies to requests, so
//! `https://bücher.de/café` matches the request it reads like.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::{Host, Url};

const RECURSIVE: &str = "**";
const SCHEME_WILDCARD: &str = "[^:/]*";
const HOST_WILDCARD: &str = "[^/]*";
const SEGMENT_WILDCARD: &str = "[^/]*";
const ANY_SEGMENTS: &str = "(?:/[^/]*)*";

/// Errors raised while compiling a URL pattern.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("URL pattern is empty")]
    Empty,

    #[error("URL pattern '{0}' has no scheme (expected scheme://host/path)")]
    MissingScheme(String),

    #[error("URL pattern '{0}' has no host")]
    EmptyHost(String),

    #[error("URL pattern '{0}' has an invalid host")]
    InvalidHost(String),

    #[error("URL pattern '{0}' has an invalid port")]
    InvalidPort(String),

    #[error("URL pattern '{0}' has an invalid path")]
    InvalidPath(String),

    #[error("URL pattern '{0}' does not compile: {1}")]
    Compile(String, String),
}

/// A compiled URL pattern.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    text: String,
    exclude: bool,
    regex: Regex,
}

impl UrlPattern {
    /// Compile a pattern.
    pub fn parse(text: &str) -> Result<Self, PatternError> {
        let trimmed = text.trim();
        let (exclude, body) = match trimmed.strip_prefix('!') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, trimmed),
        };
        if body.is_empty() {
            return Err(PatternError::Empty);
        }

        let (scheme, rest) = body
            .split_once("://")
            .filter(|(scheme, _)| !scheme.is_empty())
            .ok_or_else(|| PatternError::MissingScheme(trimmed.to_string()))?;

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], Some(&rest[idx..])),
            None => (rest, None),
        };

        let (host, port) = split_port(authority)
            .ok_or_else(|| PatternError::InvalidPort(trimmed.to_string()))?;
        if host.is_empty() {
            return Err(PatternError::EmptyHost(trimmed.to_string()));
        }
        let host = normalize_host(host)
            .ok_or_else(|| PatternError::InvalidHost(trimmed.to_string()))?;
        let path = path
            .map(|p| normalize_path(p).ok_or_else(|| PatternError::InvalidPath(trimmed.to_string())))
            .transpose()?;

        let mut source = String::from("^(?i:");
        source.push_str(&wildcard(&scheme.to_ascii_lowercase(), SCHEME_WILDCARD));
        source.push_str(")://(?i:");
        source.push_str(&wildcard(&host, HOST_WILDCARD));
        source.push(')');
        match port {
            Some(port) => source.push_str(&format!(":{}", port)),
            None => source.push_str(":[0-9]*"),
        }
        match &path {
            Some(path) => source.push_str(&path_source(path)),
            None => source.push_str("(?:/.*)?"),
        }
        source.push('$');

        let regex = Regex::new(&source)
            .map_err(|e| PatternError::Compile(trimmed.to_string(), e.to_string()))?;

        Ok(Self {
            text: trimmed.to_string(),
            exclude,
            regex,
        })
    }

    /// The pattern as written, including a leading `!`.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_exclusion(&self) -> bool {
        self.exclude
    }

    /// Whether the URL falls under this pattern, ignoring the exclusion flag.
    pub fn matches_url(&self, url: &Url) -> bool {
        let host = match url.host_str() {
            Some(host) => host,
            None => return false,
        };
        let port = url
            .port_or_known_default()
            .map(|p| p.to_string())
            .unwrap_or_default();
        let target = format!("{}://{}:{}{}", url.scheme(), host, port, url.path());
        self.regex.is_match(&target)
    }
}

impl PartialEq for UrlPattern {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for UrlPattern {}

impl FromStr for UrlPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// The set of URL patterns one plugin watches.
///
/// An empty set restricts nothing. Watch sets are immutable once built and
/// are shared between sessions behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSet {
    include: Vec<UrlPattern>,
    exclude: Vec<UrlPattern>,
}

impl WatchSet {
    /// A set that matches every URL.
    pub fn match_all() -> Self {
        Self::default()
    }

    /// Compile a list of patterns; `!`-prefixed entries become exclusions.
    pub fn parse<I, S>(patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for text in patterns {
            let pattern = UrlPattern::parse(text.as_ref())?;
            if pattern.is_exclusion() {
                set.exclude.push(pattern);
            } else {
                set.include.push(pattern);
            }
        }
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn len(&self) -> usize {
        self.include.len() + self.exclude.len()
    }

    /// All patterns, includes first.
    pub fn patterns(&self) -> impl Iterator<Item = &UrlPattern> {
        self.include.iter().chain(self.exclude.iter())
    }

    /// Pattern texts, suitable for serializing back into configuration.
    pub fn to_strings(&self) -> Vec<String> {
        self.patterns().map(|p| p.as_str().to_string()).collect()
    }

    /// Whether a raw request URL is watched.
    ///
    /// Malformed URLs never match a non-empty set.
    pub fn matches(&self, url: &str) -> bool {
        if self.is_empty() {
            return true;
        }
        match Url::parse(url) {
            Ok(parsed) => self.matches_url(&parsed),
            Err(_) => false,
        }
    }

    /// Whether a parsed URL is watched.
    pub fn matches_url(&self, url: &Url) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|p| p.matches_url(url));
        included && !self.exclude.iter().any(|p| p.matches_url(url))
    }
}

impl Serialize for WatchSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_strings().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WatchSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let patterns = Vec::<String>::deserialize(deserializer)?;
        WatchSet::parse(patterns).map_err(serde::de::Error::custom)
    }
}

/// Whether `url` falls inside `watch`.
pub fn matches(url: &str, watch: &WatchSet) -> bool {
    watch.matches(url)
}

/// Split `host[:port]`. `None` means the port is not a number; `*` means any.
fn split_port(authority: &str) -> Option<(&str, Option<u16>)> {
    if authority.ends_with(']') {
        return Some((authority, None));
    }
    match authority.rsplit_once(':') {
        None => Some((authority, None)),
        Some((host, "*")) => Some((host, None)),
        Some((host, port)) => port.parse::<u16>().ok().map(|p| (host, Some(p))),
    }
}

/// Bring a pattern host into the form `Url::host_str` reports.
///
/// Literal labels go through IDNA; labels holding a wildcard are only
/// lowercased.
fn normalize_host(host: &str) -> Option<String> {
    if host.starts_with('[') && !host.contains('*') {
        return Host::parse(host).ok().map(|h| h.to_string());
    }
    let labels = host
        .split('.')
        .map(|label| {
            if label.is_ascii() || label.contains('*') {
                Some(label.to_lowercase())
            } else {
                match Host::parse(label) {
                    Ok(Host::Domain(domain)) => Some(domain),
                    _ => None,
                }
            }
        })
        .collect::<Option<Vec<_>>>()?;
    Some(labels.join("."))
}

/// Percent-encode a pattern path the way `url` encodes request paths.
/// `*` is left alone by the path encode set.
fn normalize_path(path: &str) -> Option<String> {
    Url::parse(&format!("http://pattern.invalid{}", path))
        .ok()
        .map(|url| url.path().to_string())
}

fn path_source(path: &str) -> String {
    let mut source = String::new();
    for segment in path.strip_prefix('/').unwrap_or(path).split('/') {
        if segment == RECURSIVE {
            source.push_str(ANY_SEGMENTS);
        } else {
            source.push('/');
            source.push_str(&wildcard(segment, SEGMENT_WILDCARD));
        }
    }
    source
}

/// Escape `text` for a regex, turning each run of `*` into `star`.
fn wildcard(text: &str, star: &str) -> String {
    let mut source = String::new();
    let mut pieces = text.split('*');
    if let Some(first) = pieces.next() {
        source.push_str(&regex::escape(first));
    }
    let mut after_star = false;
    for piece in pieces {
        if !after_star {
            source.push_str(star);
        }
        source.push_str(&regex::escape(piece));
        after_star = piece.is_empty();
    }
    source
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(patterns: &[&str]) -> WatchSet {
        WatchSet::parse(patterns.iter().copied()).unwrap()
    }

    #[test]
    fn test_single_wildcard_stays_in_segment() {
        let watch = set(&["https://api.example.com/*"]);

        assert!(watch.matches("https://api.example.com/v1"));
        assert!(!watch.matches("https://api.example.com/v1/items"));
        assert!(!watch.matches("https://other.example.com/v1"));
    }

    #[test]
    fn test_recursive_wildcard_crosses_segments() {
        let watch = set(&["https://api.example.com/v1/**"]);

        assert!(watch.matches("https://api.example.com/v1"));
        assert!(watch.matches("https://api.example.com/v1/items"));
        assert!(watch.matches("https://api.example.com/v1/items/42/notes"));
        assert!(!watch.matches("https://api.example.com/v2/items"));
    }

    #[test]
    fn test_recursive_wildcard_in_the_middle() {
        let watch = set(&["https://cdn.example.com/**/*.js"]);

        assert!(watch.matches("https://cdn.example.com/app.js"));
        assert!(watch.matches("https://cdn.example.com/static/v2/app.js"));
        assert!(!watch.matches("https://cdn.example.com/static/app.css"));
    }

    #[test]
    fn test_scheme_and_host_case_insensitive_path_case_sensitive() {
        let watch = set(&["HTTPS://API.Example.COM/Users"]);

        assert!(watch.matches("https://api.example.com/Users"));
        assert!(!watch.matches("https://api.example.com/users"));
    }

    #[test]
    fn test_host_wildcard_spans_labels() {
        let watch = set(&["https://*.example.com/*"]);

        assert!(watch.matches("https://api.example.com/v1"));
        assert!(watch.matches("https://a.b.example.com/v1"));
        assert!(!watch.matches("https://example.com/v1"));
        assert!(!watch.matches("https://example.com.evil.org/v1"));
    }

    #[test]
    fn test_all_https_traffic() {
        let watch = set(&["https://*/*"]);

        assert!(watch.matches("https://api.example.com/v1"));
        assert!(watch.matches("https://localhost/v1"));
        assert!(watch.matches("https://127.0.0.1:8443/v1"));
        assert!(watch.matches("https://[::1]/v1"));
        assert!(!watch.matches("http://api.example.com/v1"));
        assert!(!watch.matches("https://api.example.com/v1/items"));
    }

    #[test]
    fn test_pattern_matches_url_as_written() {
        let accented = set(&["https://example.com/café"]);
        assert!(accented.matches("https://example.com/café"));
        assert!(accented.matches("https://example.com/caf%C3%A9"));

        let spaced = set(&["https://example.com/my docs/*"]);
        assert!(spaced.matches("https://example.com/my docs/a"));
        assert!(!spaced.matches("https://example.com/my docs/a/b"));

        let idn = set(&["https://bücher.de/*"]);
        assert!(idn.matches("https://bücher.de/x"));
        assert!(idn.matches("https://xn--bcher-kva.de/x"));
        assert!(!idn.matches("https://bucher.de/x"));

        let idn_wildcard = set(&["https://*.bücher.de/**"]);
        assert!(idn_wildcard.matches("https://shop.bücher.de/a/b"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let watch = set(&["https://api.example.com/v1.0/(items)+"]);

        assert!(watch.matches("https://api.example.com/v1.0/(items)+"));
        assert!(!watch.matches("https://api.example.com/v1x0/(items)+"));
        assert!(!watch.matches("https://apixexample.com/v1.0/(items)+"));
    }

    #[test]
    fn test_ipv6_host_with_port() {
        let watch = set(&["http://[::1]:8080/*"]);

        assert!(watch.matches("http://[::1]:8080/a"));
        assert!(watch.matches("http://[0:0::1]:8080/a"));
        assert!(!watch.matches("http://[::1]:9090/a"));
    }

    #[test]
    fn test_scheme_wildcard() {
        let watch = set(&["*://example.com/health"]);

        assert!(watch.matches("http://example.com/health"));
        assert!(watch.matches("https://example.com/health"));
    }

    #[test]
    fn test_partial_segment_wildcard() {
        let watch = set(&["https://api.example.com/v*/users"]);

        assert!(watch.matches("https://api.example.com/v1/users"));
        assert!(watch.matches("https://api.example.com/v/users"));
        assert!(!watch.matches("https://api.example.com/x1/users"));
    }

    #[test]
    fn test_pattern_without_path_matches_whole_host() {
        let watch = set(&["https://api.example.com"]);

        assert!(watch.matches("https://api.example.com/"));
        assert!(watch.matches("https://api.example.com/deep/path?q=1"));
    }

    #[test]
    fn test_query_and_fragment_ignored() {
        let watch = set(&["https://api.example.com/search"]);
        assert!(watch.matches("https://api.example.com/search?q=rust#top"));
    }

    #[test]
    fn test_ports() {
        let explicit = set(&["http://localhost:8080/*"]);
        assert!(explicit.matches("http://localhost:8080/api"));
        assert!(!explicit.matches("http://localhost:9090/api"));

        let default_port = set(&["https://example.com:443/*"]);
        assert!(default_port.matches("https://example.com/a"));

        let any_port = set(&["http://localhost/*"]);
        assert!(any_port.matches("http://localhost:3000/a"));
        assert!(any_port.matches("http://localhost/a"));
    }

    #[test]
    fn test_exclusions_veto_includes() {
        let watch = set(&["https://api.example.com/**", "!https://api.example.com/health"]);

        assert!(watch.matches("https://api.example.com/v1/users"));
        assert!(!watch.matches("https://api.example.com/health"));
    }

    #[test]
    fn test_exclusion_only_set() {
        let watch = set(&["!https://telemetry.example.com/**"]);

        assert!(watch.matches("https://api.example.com/v1"));
        assert!(!watch.matches("https://telemetry.example.com/events"));
    }

    #[test]
    fn test_malformed_url_does_not_match() {
        let watch = set(&["https://api.example.com/*"]);

        assert!(!watch.matches("not a url"));
        assert!(!watch.matches("https://"));
        assert!(watch.matches("https://api.example.com/ok"));
    }

    #[test]
    fn test_empty_set_matches_everything() {
        let watch = WatchSet::match_all();
        assert!(watch.is_empty());
        assert!(watch.matches("https://anything.example.org/a/b/c"));
        assert!(matches("http://127.0.0.1:1/", &watch));
    }

    #[test]
    fn test_pattern_errors() {
        assert_eq!(UrlPattern::parse("  "), Err(PatternError::Empty));
        assert!(matches!(
            UrlPattern::parse("api.example.com/*"),
            Err(PatternError::MissingScheme(_))
        ));
        assert!(matches!(
            UrlPattern::parse("https:///path"),
            Err(PatternError::EmptyHost(_))
        ));
        assert!(matches!(
            UrlPattern::parse("https://example.com:http/"),
            Err(PatternError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_serde_round_trip_keeps_text() {
        let watch: WatchSet =
            serde_json::from_value(serde_json::json!(["https://a.com/*", "!https://a.com/x"]))
                .unwrap();
        assert_eq!(watch.len(), 2);
        assert_eq!(
            serde_json::to_value(&watch).unwrap(),
            serde_json::json!(["https://a.com/*", "!https://a.com/x"])
        );
    }

    #[test]
    fn test_wildcard_runs_collapse() {
        assert_eq!(wildcard("a**b", "X"), "aXb");
        assert_eq!(wildcard("*", "X"), "X");
        assert_eq!(wildcard("v1.*", "X"), "v1\\.X");
    }

    proptest! {
        #[test]
        fn prop_empty_set_matches_any_valid_url(
            scheme in prop::sample::select(vec!["http", "https"]),
            host in "[a-z]{1,10}(\\.[a-z]{1,10}){0,2}",
            path in "(/[a-zA-Z0-9_-]{0,8}){0,4}",
        ) {
            let url = format!("{}://{}{}", scheme, host, path);
            prop_assert!(WatchSet::match_all().matches(&url));
        }

        #[test]
        fn prop_recursive_pattern_matches_any_path_on_host(
            host in "[a-z]{1,10}\\.com",
            path in "(/[a-zA-Z0-9_-]{1,8}){0,4}",
        ) {
            let watch = WatchSet::parse([format!("https://{}/**", host)]).unwrap();
            let url = format!("https://{}{}", host.to_uppercase(), path);
            prop_assert!(watch.matches(&url));
        }

        #[test]
        fn prop_matching_is_deterministic(path in "(/[a-z]{1,5}){0,3}") {
            let watch = WatchSet::parse(["https://example.com/*/x"]).unwrap();
            let url = format!("https://example.com{}", path);
            prop_assert_eq!(watch.matches(&url), watch.matches(&url));
        }
    }
}

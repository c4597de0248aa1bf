//! Ranked download strategies per format family.

use std::time::Duration;

use rand::seq::SliceRandom;
use serde::Serialize;

const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Android 13; Mobile; rv:109.0) Gecko/111.0 Firefox/111.0",
    "Mozilla/5.0 (Linux; Android 13; SM-S901B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/112.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

const IPHONE_SAFARI_UA: &str = USER_AGENTS[0];
const ANDROID_FIREFOX_UA: &str = USER_AGENTS[1];
const FALLBACK_UA: &str = "yt-dlp/2023.01.06";

pub const USER_AGENT: &str = "User-Agent";

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FormatFamily {
    Audio,
    Video,
}

impl FormatFamily {
    /// Maps the wire value of the `format` field. Only `mp3`/`audio` select
    /// audio; anything else, including no value, is video.
    pub fn from_wire(value: Option<&str>) -> Self {
        match value.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("mp3") | Some("audio") => Self::Audio,
            _ => Self::Video,
        }
    }
}

/// Ordered header list with case-insensitive keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet(Vec<(String, String)>);

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.insert(name, value);
        self
    }

    /// Replaces an existing header of the same name, otherwise appends.
    pub fn insert(&mut self, name: &str, value: &str) {
        match self
            .0
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => self.0.push((name.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

/// Options handed through to the extractor untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractorHints {
    pub skip_protocols: Vec<String>,
    pub player_skip: Vec<String>,
    pub force_generic_extractor: bool,
}

#[derive(Debug, Clone)]
pub struct Strategy {
    pub name: &'static str,
    pub format_selector: &'static str,
    pub headers: HeaderSet,
    pub timeout: Duration,
    pub hints: ExtractorHints,
}

pub trait StrategyCatalog: Send + Sync {
    /// Strategies for `family`, most capable first.
    fn strategies(&self, family: FormatFamily) -> Vec<Strategy>;

    /// Shared header profile every strategy is merged over.
    fn base_headers(&self) -> HeaderSet;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCatalog;

impl StrategyCatalog for DefaultCatalog {
    fn strategies(&self, family: FormatFamily) -> Vec<Strategy> {
        let (mobile_selector, mobile_ua, generic_selector, fallback_selector) = match family {
            FormatFamily::Audio => (
                "bestaudio/best",
                IPHONE_SAFARI_UA,
                "bestaudio[ext=m4a]/bestaudio[ext=webm]/bestaudio",
                "worst/bestaudio/best",
            ),
            FormatFamily::Video => (
                "best[height<=720]/best[height<=480]/best",
                ANDROID_FIREFOX_UA,
                "best[ext=mp4]/best",
                "worst/best",
            ),
        };

        vec![
            Strategy {
                name: "Mobile Bypass",
                format_selector: mobile_selector,
                headers: HeaderSet::new().with(USER_AGENT, mobile_ua),
                timeout: Duration::from_secs(30),
                hints: ExtractorHints {
                    skip_protocols: vec!["hls".to_string(), "dash".to_string()],
                    player_skip: vec!["config".to_string()],
                    force_generic_extractor: false,
                },
            },
            Strategy {
                name: "Generic Extractor",
                format_selector: generic_selector,
                headers: HeaderSet::new(),
                timeout: Duration::from_secs(45),
                hints: ExtractorHints {
                    force_generic_extractor: true,
                    ..ExtractorHints::default()
                },
            },
            Strategy {
                name: "Simple Fallback",
                format_selector: fallback_selector,
                headers: HeaderSet::new().with(USER_AGENT, FALLBACK_UA),
                timeout: Duration::from_secs(60),
                hints: ExtractorHints::default(),
            },
        ]
    }

    fn base_headers(&self) -> HeaderSet {
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[3]);

        HeaderSet::new()
            .with(USER_AGENT, user_agent)
            .with(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .with("Accept-Language", "en-US,en;q=0.9")
            .with("Accept-Encoding", "gzip, deflate, br")
            .with("DNT", "1")
            .with("Connection", "keep-alive")
            .with("Upgrade-Insecure-Requests", "1")
            .with("Sec-Fetch-Dest", "document")
            .with("Sec-Fetch-Mode", "navigate")
            .with("Sec-Fetch-Site", "none")
            .with("Cache-Control", "max-age=0")
    }
}

/// Overlays the strategy's headers on the base profile; strategy values win.
pub fn merge_headers(base: &HeaderSet, strategy: &Strategy) -> HeaderSet {
    let mut merged = base.clone();
    for (name, value) in strategy.headers.iter() {
        merged.insert(name, value);
    }
    merged
}

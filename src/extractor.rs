//! The media extraction capability and its yt-dlp implementation.

use std::{io::ErrorKind, path::PathBuf, time::Duration};

use async_trait::async_trait;
use tokio::{process::Command, time::timeout};
use tracing::debug;

use crate::{
    error::AttemptFailure,
    strategy::{ExtractorHints, HeaderSet},
};

/// Everything one extraction attempt needs besides the URL.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub output_template: String,
    pub format_selector: String,
    pub headers: HeaderSet,
    pub timeout: Duration,
    pub hints: ExtractorHints,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Fetches `url` and returns the path of the produced file. The path is
    /// only what the extractor reports; callers check that it exists.
    async fn extract(&self, url: &str, options: &ExtractOptions) -> Result<PathBuf, AttemptFailure>;
}

#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    binary: String,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn extract(&self, url: &str, options: &ExtractOptions) -> Result<PathBuf, AttemptFailure> {
        let args = build_args(url, options);
        debug!("Running {} {:?}", self.binary, args);

        let command_future = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output();
        let output = timeout(options.timeout, command_future)
            .await
            .map_err(|_| {
                AttemptFailure::new(format!(
                    "yt-dlp did not finish within {} seconds",
                    options.timeout.as_secs()
                ))
            })?
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    AttemptFailure::new(format!("{} is not installed on this system", self.binary))
                } else {
                    AttemptFailure::new(format!("Could not run {}: {error}", self.binary))
                }
            })?;

        if !output.status.success() {
            return Err(AttemptFailure::new(run_error_message(&output.stderr)));
        }

        extract_printed_path(&output.stdout)
            .map(PathBuf::from)
            .ok_or_else(|| AttemptFailure::new("yt-dlp finished without reporting an output file"))
    }
}

pub fn build_args(url: &str, options: &ExtractOptions) -> Vec<String> {
    let mut args = vec![
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--newline".to_string(),
        "--print".to_string(),
        "after_move:filepath".to_string(),
        "-o".to_string(),
        options.output_template.clone(),
        "-f".to_string(),
        options.format_selector.clone(),
        "--socket-timeout".to_string(),
        options.timeout.as_secs().to_string(),
    ];

    for (name, value) in options.headers.iter() {
        args.push("--add-header".to_string());
        args.push(format!("{name}:{value}"));
    }

    if let Some(extractor_args) = youtube_extractor_args(&options.hints) {
        args.push("--extractor-args".to_string());
        args.push(extractor_args);
    }

    if options.hints.force_generic_extractor {
        args.push("--force-generic-extractor".to_string());
    }

    args.push(url.to_string());
    args
}

fn youtube_extractor_args(hints: &ExtractorHints) -> Option<String> {
    let mut parts = Vec::new();
    if !hints.skip_protocols.is_empty() {
        parts.push(format!("skip={}", hints.skip_protocols.join(",")));
    }
    if !hints.player_skip.is_empty() {
        parts.push(format!("player_skip={}", hints.player_skip.join(",")));
    }

    if parts.is_empty() {
        None
    } else {
        Some(format!("youtube:{}", parts.join(";")))
    }
}

fn run_error_message(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the download")
        .to_string()
}

fn extract_printed_path(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
}

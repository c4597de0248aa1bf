use std::path::PathBuf;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_DOWNLOAD_DIR: &str = "static/downloads";
const DEFAULT_YT_DLP_BIN: &str = "yt-dlp";

pub const PUBLIC_DOWNLOADS_PREFIX: &str = "/static/downloads";

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub download_dir: PathBuf,
    pub public_base_url: Option<String>,
    pub yt_dlp_bin: String,
    pub pacing_enabled: bool,
    pub allowed_origins: Vec<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| lookup(name).and_then(|value| non_empty(&value).map(ToString::to_string));

        let bind_addr = read("APP_ADDR").unwrap_or_else(|| {
            let port = read("PORT")
                .and_then(|value| value.parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT);
            format!("0.0.0.0:{port}")
        });

        let allowed_origins = read("ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Self {
            bind_addr,
            download_dir: read("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR)),
            public_base_url: read("PUBLIC_BASE_URL")
                .map(|value| value.trim_end_matches('/').to_string()),
            yt_dlp_bin: read("YT_DLP_BIN").unwrap_or_else(|| DEFAULT_YT_DLP_BIN.to_string()),
            pacing_enabled: read("PACING_ENABLED")
                .and_then(|value| parse_bool(&value))
                .unwrap_or(true),
            allowed_origins,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

use std::{collections::HashSet, sync::Arc};

use axum::{
    Form, Json, Router,
    extract::{
        State,
        rejection::{FormRejection, JsonRejection},
    },
    http::{HeaderMap, HeaderValue, Method, header::HOST},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::{PUBLIC_DOWNLOADS_PREFIX, Settings, non_empty},
    error::ApiError,
    orchestrator::{DownloadRequest, DownloadResult, Orchestrator},
    strategy::FormatFamily,
};

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    public_base_url: Option<String>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, public_base_url: Option<String>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            public_base_url,
        }
    }
}

/// Body of both download endpoints. Every field is optional so a missing
/// `url` is reported by us rather than by the extractor.
#[derive(Debug, Default, Deserialize)]
pub struct DownloadPayload {
    pub url: Option<String>,
    pub format: Option<String>,
}

pub fn router(state: AppState, settings: &Settings) -> Result<Router, ApiError> {
    let cors = build_cors_layer(&settings.allowed_origins)?;
    let downloads = ServeDir::new(state.orchestrator.store().dir());

    Ok(Router::new()
        .route("/api/health", get(health))
        .route("/api/download", post(api_download))
        .route("/download", post(download_form))
        .nest_service(PUBLIC_DOWNLOADS_PREFIX, downloads)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn api_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<DownloadPayload>, JsonRejection>,
) -> Result<Json<DownloadResult>, ApiError> {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            debug!("Unreadable JSON body: {rejection}");
            DownloadPayload::default()
        }
    };

    handle_download(&state, &headers, payload).await
}

/// Form-encoded twin of `/api/download`; answers with the same JSON.
async fn download_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Form<DownloadPayload>, FormRejection>,
) -> Result<Json<DownloadResult>, ApiError> {
    let payload = match payload {
        Ok(Form(payload)) => payload,
        Err(rejection) => {
            debug!("Unreadable form body: {rejection}");
            DownloadPayload::default()
        }
    };

    handle_download(&state, &headers, payload).await
}

async fn handle_download(
    state: &AppState,
    headers: &HeaderMap,
    payload: DownloadPayload,
) -> Result<Json<DownloadResult>, ApiError> {
    let request = validate_payload(payload)?;
    let mut result = state.orchestrator.orchestrate(&request).await?;

    if let Some(base) = public_base(state, headers) {
        result.download_url = format!("{base}{}", result.download_url);
    }

    Ok(Json(result))
}

fn validate_payload(payload: DownloadPayload) -> Result<DownloadRequest, ApiError> {
    let url = payload
        .url
        .as_deref()
        .and_then(non_empty)
        .ok_or_else(|| ApiError::bad_request("URL is required"))?;

    Ok(DownloadRequest {
        url: url.to_string(),
        format: FormatFamily::from_wire(payload.format.as_deref()),
    })
}

/// Absolute origin for download links. `PUBLIC_BASE_URL` always wins. The
/// `Host` fallback is client-controlled and plain http, so it only suits local
/// development.
fn public_base(state: &AppState, headers: &HeaderMap) -> Option<String> {
    if let Some(base) = &state.public_base_url {
        return Some(base.clone());
    }

    headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .and_then(non_empty)
        .map(|host| format!("http://{host}"))
}

fn build_cors_layer(configured: &[String]) -> Result<CorsLayer, ApiError> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if configured.is_empty() {
        warn!("ALLOWED_ORIGINS is not set. Requests from any origin will be accepted.");
        return Ok(layer.allow_origin(Any));
    }

    let normalized_origins = configured
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://domain.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        normalized_origins.len(),
        normalized_origins
    );

    let allowed_origins = Arc::new(normalized_origins);
    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let normalized = origin.to_str().ok().and_then(normalize_origin);
        let allowed = normalized
            .as_ref()
            .is_some_and(|value| allowed_origins.contains(value));
        debug!(
            "CORS origin check raw={:?} normalized={:?} allowed={}",
            origin, normalized, allowed
        );
        allowed
    });

    Ok(layer.allow_origin(allow_origin))
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
    };
    use tempfile::tempdir;

    use super::*;
    use crate::{
        artifact::ArtifactStore,
        orchestrator::tests::{ScriptedExtractor, Step},
        pacing::NoPacing,
        strategy::DefaultCatalog,
    };

    fn state(dir: &Path, extractor: Arc<ScriptedExtractor>, base: Option<&str>) -> AppState {
        let orchestrator = Orchestrator::new(
            ArtifactStore::new(dir, PUBLIC_DOWNLOADS_PREFIX),
            Arc::new(DefaultCatalog),
            Arc::new(NoPacing),
            extractor,
        );
        AppState::new(orchestrator, base.map(ToString::to_string))
    }

    fn payload(url: Option<&str>, format: Option<&str>) -> DownloadPayload {
        DownloadPayload {
            url: url.map(ToString::to_string),
            format: format.map(ToString::to_string),
        }
    }

    fn host_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("localhost:5000"));
        headers
    }

    async fn body_json(response: Response) -> (StatusCode, serde_json::Value) {
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn is_empty_dir(dir: &Path) -> bool {
        let mut entries = tokio::fs::read_dir(dir).await.unwrap();
        entries.next_entry().await.unwrap().is_none()
    }

    #[tokio::test]
    async fn missing_url_is_rejected_without_side_effects() {
        let temp_dir = tempdir().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(vec![Step::Produce("mp4")]));
        let state = state(temp_dir.path(), extractor.clone(), None);

        for body in [payload(None, Some("mp4")), payload(Some("   "), None)] {
            let response = api_download(State(state.clone()), host_headers(), Ok(Json(body)))
                .await
                .into_response();
            let (status, json) = body_json(response).await;

            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json["status"], "error");
            assert_eq!(json["message"], "URL is required");
        }

        assert!(extractor.calls().is_empty());
        assert!(is_empty_dir(temp_dir.path()).await);
    }

    #[tokio::test]
    async fn locator_without_scheme_is_passed_through() {
        let temp_dir = tempdir().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(vec![
            Step::Produce("mp4"),
            Step::Produce("mp4"),
        ]));
        let state = state(temp_dir.path(), extractor.clone(), None);

        for locator in ["youtube.com/watch?v=dQw4w9WgXcQ", "dQw4w9WgXcQ"] {
            let response = api_download(
                State(state.clone()),
                HeaderMap::new(),
                Ok(Json(payload(Some(locator), None))),
            )
            .await
            .into_response();
            let (status, json) = body_json(response).await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["status"], "success");
        }

        let urls: Vec<String> = extractor.calls().into_iter().map(|call| call.url).collect();
        assert_eq!(urls[0], "youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(urls[1], "dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn success_response_uses_host_for_absolute_url() {
        let temp_dir = tempdir().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(vec![
            Step::Fail("blocked"),
            Step::Fail("blocked again"),
            Step::Produce("mp4"),
        ]));
        let state = state(temp_dir.path(), extractor, None);

        let response = api_download(
            State(state),
            host_headers(),
            Ok(Json(payload(Some("https://example/video"), Some("mp4")))),
        )
        .await
        .into_response();
        let (status, json) = body_json(response).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "success");
        assert_eq!(json["strategy_used"], "Simple Fallback");
        let url = json["download_url"].as_str().unwrap();
        assert!(url.starts_with("http://localhost:5000/static/downloads/"));
        assert!(url.ends_with(".mp4"));
        assert!(json.get("details").is_none());
    }

    #[tokio::test]
    async fn configured_base_url_ignores_host_header() {
        let temp_dir = tempdir().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(vec![Step::Produce("mp4")]));
        let state = state(temp_dir.path(), extractor, Some("https://media.example.com"));

        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("attacker.example"));
        let response = api_download(
            State(state),
            headers,
            Ok(Json(payload(Some("https://example/video"), None))),
        )
        .await
        .into_response();
        let (status, json) = body_json(response).await;

        assert_eq!(status, StatusCode::OK);
        let url = json["download_url"].as_str().unwrap();
        assert!(url.starts_with("https://media.example.com/static/downloads/"), "{url}");
    }

    #[tokio::test]
    async fn exhaustion_is_still_a_200() {
        let temp_dir = tempdir().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(vec![
            Step::Fail("a"),
            Step::Fail("b"),
            Step::Fail("c"),
        ]));
        let state = state(
            temp_dir.path(),
            extractor,
            Some("https://media.example.com"),
        );

        let response = api_download(
            State(state),
            HeaderMap::new(),
            Ok(Json(payload(Some("https://example/video"), Some("mp3")))),
        )
        .await
        .into_response();
        let (status, json) = body_json(response).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "partial_success");
        assert_eq!(json["details"], "c");
        assert!(json["message"].is_string());
        assert!(json.get("strategy_used").is_none());
        let url = json["download_url"].as_str().unwrap();
        assert!(url.starts_with("https://media.example.com/static/downloads/"));
        assert!(url.ends_with("_placeholder.txt"));
    }

    #[tokio::test]
    async fn form_endpoint_answers_with_the_same_json() {
        let temp_dir = tempdir().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(vec![Step::Produce("m4a")]));
        let state = state(temp_dir.path(), extractor.clone(), None);

        let response = download_form(
            State(state.clone()),
            HeaderMap::new(),
            Ok(Form(payload(Some("https://example/song"), Some("mp3")))),
        )
        .await
        .into_response();
        let (status, json) = body_json(response).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "success");
        assert_eq!(json["strategy_used"], "Mobile Bypass");
        assert!(
            json["download_url"]
                .as_str()
                .unwrap()
                .starts_with("/static/downloads/")
        );
        assert_eq!(extractor.calls()[0].format_selector, "bestaudio/best");

        let response = download_form(State(state), HeaderMap::new(), Ok(Form(payload(None, None))))
            .await
            .into_response();
        let (status, json) = body_json(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "URL is required");
    }

    #[test]
    fn origins_are_normalized() {
        assert_eq!(
            normalize_origin("https://Example.com"),
            Some("https://example.com".to_string())
        );
        assert_eq!(
            normalize_origin("https://example.com:443"),
            Some("https://example.com".to_string())
        );
        assert_eq!(
            normalize_origin("http://localhost:5173"),
            Some("http://localhost:5173".to_string())
        );
        assert_eq!(normalize_origin("https://example.com/app"), None);
        assert_eq!(normalize_origin("ftp://example.com"), None);
    }

    #[test]
    fn invalid_configured_origin_fails_startup() {
        assert!(build_cors_layer(&["not an origin".to_string()]).is_err());
        assert!(build_cors_layer(&["https://ok.example".to_string()]).is_ok());
        assert!(build_cors_layer(&[]).is_ok());
    }
}

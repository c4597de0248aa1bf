//! Ranked strategy fallback for one download request.

use std::{path::PathBuf, sync::Arc};

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    artifact::{ArtifactStore, RequestId, file_name_of},
    error::{AttemptFailure, StorageError},
    extractor::{ExtractOptions, Extractor},
    pacing::PacingPolicy,
    strategy::{FormatFamily, HeaderSet, Strategy, StrategyCatalog, merge_headers},
};

const PLACEHOLDER_MESSAGE: &str = "The media could not be downloaded right now, so a placeholder file was created instead. Please try again in a little while.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub format: FormatFamily,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    PartialSuccess,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub status: ResultStatus,
    pub download_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub strategy: &'static str,
    pub success: bool,
    pub local_path: Option<PathBuf>,
    pub error_message: Option<String>,
}

impl AttemptOutcome {
    fn from_result(strategy: &'static str, result: Result<PathBuf, AttemptFailure>) -> Self {
        match result {
            Ok(path) => Self {
                strategy,
                success: true,
                local_path: Some(path),
                error_message: None,
            },
            Err(failure) => Self {
                strategy,
                success: false,
                local_path: None,
                error_message: Some(failure.message),
            },
        }
    }
}

pub struct Orchestrator {
    store: ArtifactStore,
    catalog: Arc<dyn StrategyCatalog>,
    pacing: Arc<dyn PacingPolicy>,
    extractor: Arc<dyn Extractor>,
}

impl Orchestrator {
    pub fn new(
        store: ArtifactStore,
        catalog: Arc<dyn StrategyCatalog>,
        pacing: Arc<dyn PacingPolicy>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            store,
            catalog,
            pacing,
            extractor,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Runs the strategies for `request.format` in order until one produces a
    /// file. Extraction problems never surface as an error; only a failure to
    /// write the placeholder does.
    pub async fn orchestrate(
        &self,
        request: &DownloadRequest,
    ) -> Result<DownloadResult, StorageError> {
        let id = self.store.new_artifact_id();
        let output_template = self.store.output_template(id);
        info!(
            "Request {id}: {:?} download for {:?}",
            request.format, request.url
        );

        sleep(self.pacing.initial_delay()).await;

        let base_headers = self.catalog.base_headers();
        let strategies = self.catalog.strategies(request.format);
        let mut last_error = None;

        for (index, strategy) in (1..).zip(strategies.iter()) {
            if index > 1 {
                sleep(self.pacing.retry_delay(index)).await;
            }

            info!(
                "Request {id}: attempt {index} ({}) with format {}",
                strategy.name, strategy.format_selector
            );

            let outcome = self
                .attempt(&request.url, strategy, &base_headers, &output_template)
                .await;

            if let Some(filename) = outcome.local_path.as_deref().and_then(file_name_of) {
                info!(
                    "Request {id}: download succeeded with {} (attempt {index})",
                    outcome.strategy
                );
                return Ok(DownloadResult {
                    status: ResultStatus::Success,
                    download_url: self.store.public_path(&filename),
                    strategy_used: Some(outcome.strategy.to_string()),
                    message: None,
                    details: None,
                });
            }

            let error_message = outcome
                .error_message
                .unwrap_or_else(|| "Downloaded file has no usable name".to_string());
            warn!("Request {id}: {} failed: {error_message}", outcome.strategy);
            last_error = Some(error_message);

            match self.store.remove_attempt_leftovers(id).await {
                Ok(0) => {}
                Ok(removed) => debug!("Request {id}: removed {removed} leftover file(s)"),
                Err(error) => warn!("Request {id}: {error}"),
            }
        }

        let last_error = last_error.unwrap_or_else(|| {
            format!(
                "No download strategies are configured for {:?}",
                request.format
            )
        });
        self.fall_back_to_placeholder(id, request, last_error).await
    }

    async fn attempt(
        &self,
        url: &str,
        strategy: &Strategy,
        base_headers: &HeaderSet,
        output_template: &str,
    ) -> AttemptOutcome {
        let options = ExtractOptions {
            output_template: output_template.to_string(),
            format_selector: strategy.format_selector.to_string(),
            headers: merge_headers(base_headers, strategy),
            timeout: strategy.timeout,
            hints: strategy.hints.clone(),
        };

        let result = match self.extractor.extract(url, &options).await {
            Ok(reported) => match self.store.resolve_artifact(&reported).await {
                Ok(Some(path)) => Ok(path),
                Ok(None) => Err(AttemptFailure::new(format!(
                    "Download completed but file not found: {}",
                    reported.display()
                ))),
                Err(error) => Err(AttemptFailure::new(error.message)),
            },
            Err(failure) => Err(failure),
        };

        AttemptOutcome::from_result(strategy.name, result)
    }

    async fn fall_back_to_placeholder(
        &self,
        id: RequestId,
        request: &DownloadRequest,
        last_error: String,
    ) -> Result<DownloadResult, StorageError> {
        let placeholder = self.store.placeholder_path(id);
        let contents = format!(
            "Download temporarily unavailable for: {}\nTry again later or use a different video.",
            request.url
        );

        tokio::fs::write(&placeholder, contents)
            .await
            .map_err(|error| {
                StorageError::new(format!(
                    "Could not write placeholder {:?}: {error}",
                    placeholder
                ))
            })?;

        let filename = file_name_of(&placeholder)
            .ok_or_else(|| StorageError::new("Placeholder path has no file name"))?;
        warn!("Request {id}: all strategies exhausted, returning placeholder {filename}");

        Ok(DownloadResult {
            status: ResultStatus::PartialSuccess,
            download_url: self.store.public_path(&filename),
            strategy_used: None,
            message: Some(PLACEHOLDER_MESSAGE.to_string()),
            details: Some(last_error),
        })
    }
}

//! Direct HTTP/HTTPS file handler
//!
//! Catch-all backend for plain file URLs. `can_handle` issues a HEAD probe
//! and refuses HTML pages (those belong to site-specific handlers or are not
//! downloadable files at all); a probe that errors or times out also refuses,
//! so a flaky origin degrades to "not claimed" instead of a wedged dispatch.
//!
//! Transfers stream the response body chunk by chunk into the destination
//! file, updating the job table per chunk and polling the cancellation flag
//! at the same cadence.

use super::traits::{HandlerError, UrlHandler};
use super::types::{CompletedTransfer, JobTable, ProbeInfo, TransferSnapshot};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const FALLBACK_FILENAME: &str = "downloaded_file";

#[derive(Debug, Error)]
enum TransferError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct HttpHandler {
    client: reqwest::Client,
    probe_timeout: Duration,
    jobs: Arc<JobTable>,
}

impl HttpHandler {
    pub fn new(probe_timeout: Duration) -> Self {
        // Connect timeout only. A whole-request timeout would abort large
        // downloads mid-stream; probes get their own deadline below.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            probe_timeout,
            jobs: Arc::new(JobTable::new()),
        }
    }

    async fn head(&self, url: &str) -> Result<reqwest::Response, HandlerError> {
        let request = self.client.head(url).send();
        let response = tokio::time::timeout(self.probe_timeout, request)
            .await
            .map_err(|_| HandlerError::Probe(format!("HEAD {url} timed out")))?
            .map_err(|e| HandlerError::Probe(e.to_string()))?;

        response
            .error_for_status()
            .map_err(|e| HandlerError::Probe(e.to_string()))
    }
}

#[async_trait]
impl UrlHandler for HttpHandler {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn can_handle(&self, url: &str) -> bool {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return false;
        }

        match self.head(url).await {
            Ok(response) => !is_html(&response),
            Err(err) => {
                debug!(url, %err, "HEAD probe failed, not claiming URL");
                false
            }
        }
    }

    async fn probe(&self, url: &str) -> Result<ProbeInfo, HandlerError> {
        let response = self.head(url).await?;
        let size = response.content_length().unwrap_or(0);
        let kind = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let name = filename_for(url, &response);

        Ok(ProbeInfo { name, size, kind })
    }

    async fn start(&self, url: &str, dest_dir: &Path) -> Result<String, HandlerError> {
        // Placeholder name until the GET response headers arrive.
        let (id, cancel) = self.jobs.insert(&filename_from_url(url));

        let client = self.client.clone();
        let jobs = self.jobs.clone();
        let url = url.to_string();
        let dest_dir = dest_dir.to_path_buf();
        let task_id = id.clone();

        tokio::spawn(async move {
            if let Err(err) = run_transfer(client, &jobs, &task_id, &url, &dest_dir, cancel).await {
                warn!(job_id = %task_id, url, %err, "HTTP transfer failed");
                jobs.mark_error(&task_id, err.to_string());
            }
        });

        Ok(id)
    }

    async fn progress(&self, job_id: &str) -> Result<TransferSnapshot, HandlerError> {
        self.jobs
            .progress(job_id)
            .ok_or_else(|| HandlerError::NotFound(job_id.to_string()))
    }

    async fn cancel(&self, job_id: &str) -> bool {
        self.jobs.cancel(job_id)
    }

    async fn active_jobs(&self) -> Vec<TransferSnapshot> {
        self.jobs.active_snapshots()
    }

    async fn completed_jobs(&self) -> Vec<CompletedTransfer> {
        self.jobs.completed_snapshots()
    }
}

async fn run_transfer(
    client: reqwest::Client,
    jobs: &JobTable,
    id: &str,
    url: &str,
    dest_dir: &Path,
    cancel: Arc<AtomicBool>,
) -> Result<(), TransferError> {
    let mut response = client.get(url).send().await?.error_for_status()?;

    let name = filename_for(url, &response);
    let total_bytes = response.content_length().unwrap_or(0);
    jobs.set_metadata(id, &name, total_bytes);

    fs::create_dir_all(dest_dir).await?;
    let path = dest_dir.join(&name);
    let mut file = fs::File::create(&path).await?;

    let started = Instant::now();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = response.chunk().await? {
        if cancel.load(Ordering::Relaxed) {
            drop(file);
            let _ = fs::remove_file(&path).await;
            jobs.remove_active(id);
            debug!(job_id = %id, "Transfer cancelled, partial file removed");
            return Ok(());
        }

        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;

        let elapsed = started.elapsed().as_secs_f64().max(0.001);
        let rate = (downloaded as f64 / elapsed) as u64;
        jobs.record_progress(id, downloaded, total_bytes, rate);
    }

    file.flush().await?;
    jobs.complete(id, path.to_string_lossy().into_owned());
    debug!(job_id = %id, path = %path.display(), "Transfer finished");

    Ok(())
}

fn is_html(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<mime::Mime>().ok())
        .is_some_and(|m| m.type_() == mime::TEXT && m.subtype() == mime::HTML)
}

/// Filename from Content-Disposition when present, URL path otherwise.
fn filename_for(url: &str, response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_disposition)
        .unwrap_or_else(|| filename_from_url(url))
}

fn filename_from_disposition(value: &str) -> Option<String> {
    let marker = "filename=";
    let start = value.find(marker)? + marker.len();
    let rest = value[start..].trim();
    let name = rest
        .split(';')
        .next()
        .unwrap_or(rest)
        .trim()
        .trim_matches('"');

    // Reject path separators smuggled in by the origin.
    let name = PathBuf::from(name)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)?;

    if name.is_empty() { None } else { Some(name) }
}

fn filename_from_url(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);

    without_query
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))
        .map(str::to_owned)
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_url_basic() {
        assert_eq!(
            filename_from_url("https://example.com/files/archive.zip"),
            "archive.zip"
        );
    }

    #[test]
    fn test_filename_from_url_strips_query_and_fragment() {
        assert_eq!(
            filename_from_url("https://example.com/a/b.tar.gz?token=abc#section"),
            "b.tar.gz"
        );
    }

    #[test]
    fn test_filename_from_url_fallback() {
        assert_eq!(filename_from_url("https://example.com/"), FALLBACK_FILENAME);
        assert_eq!(filename_from_url("https://example.com"), FALLBACK_FILENAME);
    }

    #[test]
    fn test_filename_from_disposition_quoted() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="report final.pdf""#),
            Some("report final.pdf".to_string())
        );
    }

    #[test]
    fn test_filename_from_disposition_unquoted() {
        assert_eq!(
            filename_from_disposition("attachment; filename=data.csv"),
            Some("data.csv".to_string())
        );
    }

    #[test]
    fn test_filename_from_disposition_rejects_paths() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="../../etc/passwd""#),
            Some("passwd".to_string())
        );
    }

    #[test]
    fn test_filename_from_disposition_missing() {
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[tokio::test]
    async fn test_can_handle_rejects_other_schemes() {
        let handler = HttpHandler::new(Duration::from_millis(100));
        assert!(!handler.can_handle("ftp://example.com/file.bin").await);
        assert!(!handler.can_handle("magnet:?xt=urn:btih:abc").await);
        assert!(!handler.can_handle("not a url").await);
    }

    #[tokio::test]
    async fn test_progress_unknown_job() {
        let handler = HttpHandler::new(Duration::from_millis(100));
        assert!(matches!(
            handler.progress("missing").await,
            Err(HandlerError::NotFound(_))
        ));
    }
}

//! Media-site handler backed by the yt-dlp binary
//!
//! Claims URLs for known streaming sites and shells out to yt-dlp for the
//! actual download. Progress is scraped from the `--newline` output stream;
//! cancellation kills the child process.

use super::traits::{HandlerError, UrlHandler};
use super::types::{CompletedTransfer, JobTable, ProbeInfo, TransferSnapshot};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Sites this handler claims. Anything else falls through to the next
/// handler or the engine.
const SUPPORTED_SITES: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "nicovideo.jp",
    "twitter.com",
    "x.com",
    "instagram.com",
    "tiktok.com",
    "bilibili.com",
    "vimeo.com",
    "twitch.tv",
    "dailymotion.com",
    "soundcloud.com",
];

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct MediaHandler {
    bin: String,
    jobs: Arc<JobTable>,
}

impl MediaHandler {
    pub fn new(bin: String) -> Self {
        Self {
            bin,
            jobs: Arc::new(JobTable::new()),
        }
    }

    /// Availability check used at registry build time: the handler is only
    /// registered when the binary answers `--version`.
    pub async fn binary_available(bin: &str) -> bool {
        let check = Command::new(bin)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match tokio::time::timeout(VERSION_CHECK_TIMEOUT, check).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(err)) => {
                debug!(bin, %err, "yt-dlp binary not runnable");
                false
            }
            Err(_) => {
                debug!(bin, "yt-dlp version check timed out");
                false
            }
        }
    }
}

#[async_trait]
impl UrlHandler for MediaHandler {
    fn name(&self) -> &'static str {
        "media"
    }

    async fn can_handle(&self, url: &str) -> bool {
        let Some(host) = host_of(url) else {
            return false;
        };
        SUPPORTED_SITES
            .iter()
            .any(|site| host == *site || host.ends_with(&format!(".{site}")))
    }

    async fn probe(&self, url: &str) -> Result<ProbeInfo, HandlerError> {
        let output = Command::new(&self.bin)
            .args(["--dump-json", "--no-download", "--no-playlist", url])
            .stdin(Stdio::null())
            .output();

        let output = tokio::time::timeout(PROBE_TIMEOUT, output)
            .await
            .map_err(|_| HandlerError::Probe(format!("probe of {url} timed out")))?
            .map_err(|e| HandlerError::Probe(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HandlerError::Probe(summary_line(&stderr).to_string()));
        }

        let info: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| HandlerError::Probe(format!("unparseable metadata: {e}")))?;

        let name = info
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown")
            .to_string();
        let size = info
            .get("filesize")
            .or_else(|| info.get("filesize_approx"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        Ok(ProbeInfo {
            name,
            size,
            kind: "media".to_string(),
        })
    }

    async fn start(&self, url: &str, dest_dir: &Path) -> Result<String, HandlerError> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| HandlerError::Start(e.to_string()))?;

        let template = dest_dir.join("%(title)s.%(ext)s");
        let mut child = Command::new(&self.bin)
            .args(["--newline", "--no-playlist", "-o"])
            .arg(&template)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            // Spawn failure here means the binary disappeared after the
            // availability check at registry build time.
            .map_err(|e| HandlerError::Unavailable(e.to_string()))?;

        let (id, cancel) = self.jobs.insert(url);

        let jobs = self.jobs.clone();
        let task_id = id.clone();
        let task_url = url.to_string();

        tokio::spawn(async move {
            supervise(&jobs, &task_id, &task_url, &mut child, cancel).await;
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

/// Follow the child process: scrape progress lines, honor the cancel flag,
/// settle the job table entry when the process exits.
async fn supervise(
    jobs: &JobTable,
    id: &str,
    url: &str,
    child: &mut tokio::process::Child,
    cancel: Arc<AtomicBool>,
) {
    let Some(stdout) = child.stdout.take() else {
        jobs.mark_error(id, "child stdout unavailable".to_string());
        return;
    };
    let mut lines = BufReader::new(stdout).lines();
    let mut destination: Option<PathBuf> = None;

    loop {
        if cancel.load(Ordering::Relaxed) {
            if let Err(err) = child.kill().await {
                warn!(job_id = %id, %err, "Failed to kill yt-dlp process");
            }
            jobs.remove_active(id);
            debug!(job_id = %id, "Media transfer cancelled");
            return;
        }

        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(path) = destination_path(&line) {
                    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                        jobs.set_metadata(id, name, 0);
                    }
                    destination = Some(path);
                } else if let Some(update) = parse_progress(&line) {
                    apply_update(jobs, id, &update);
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(job_id = %id, %err, "Error reading yt-dlp output");
                break;
            }
        }
    }

    let status = match child.wait().await {
        Ok(status) => status,
        Err(err) => {
            jobs.mark_error(id, format!("failed to reap yt-dlp: {err}"));
            return;
        }
    };

    if status.success() {
        jobs.set_progress_ratio(id, 1.0);
        let path = destination
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        jobs.complete(id, path);
        debug!(job_id = %id, url, "Media transfer finished");
    } else {
        let mut detail = String::new();
        if let Some(mut stderr) = child.stderr.take() {
            let _ = stderr.read_to_string(&mut detail).await;
        }
        let message = if detail.trim().is_empty() {
            format!("yt-dlp exited with {status}")
        } else {
            summary_line(detail.trim()).to_string()
        };
        warn!(job_id = %id, url, %message, "Media transfer failed");
        jobs.mark_error(id, message);
    }
}

fn apply_update(jobs: &JobTable, id: &str, update: &ProgressUpdate) {
    if let Some(total) = update.total_bytes {
        let completed = (update.ratio * total as f64) as u64;
        jobs.record_progress(id, completed, total, update.rate_bps.unwrap_or(0));
    } else {
        jobs.set_progress_ratio(id, update.ratio);
    }
    if update.eta_seconds.is_some() {
        // record_progress derives its own ETA from rate; the scraped value
        // wins when the line carries one.
        jobs.set_eta(id, update.eta_seconds);
    }
}

#[derive(Debug, PartialEq)]
struct ProgressUpdate {
    ratio: f64,
    total_bytes: Option<u64>,
    rate_bps: Option<u64>,
    eta_seconds: Option<u64>,
}

/// Parse a `--newline` progress line such as
/// `[download]  42.5% of 10.00MiB at 1.25MiB/s ETA 00:05`.
fn parse_progress(line: &str) -> Option<ProgressUpdate> {
    let rest = line.trim().strip_prefix("[download]")?.trim();
    let mut tokens = rest.split_whitespace().peekable();

    let percent_token = tokens.next()?;
    let percent: f64 = percent_token.strip_suffix('%')?.parse().ok()?;
    let ratio = (percent / 100.0).clamp(0.0, 1.0);

    let mut total_bytes = None;
    let mut rate_bps = None;
    let mut eta_seconds = None;

    while let Some(token) = tokens.next() {
        match token {
            "of" => {
                let mut size = tokens.next()?;
                if size == "~" {
                    size = tokens.next()?;
                }
                total_bytes = parse_size(size.trim_start_matches('~'));
            }
            "at" => {
                if let Some(rate) = tokens.next() {
                    rate_bps = rate.strip_suffix("/s").and_then(parse_size);
                }
            }
            "ETA" => {
                if let Some(clock) = tokens.next() {
                    eta_seconds = parse_clock(clock);
                }
            }
            _ => {}
        }
    }

    Some(ProgressUpdate {
        ratio,
        total_bytes,
        rate_bps,
        eta_seconds,
    })
}

fn destination_path(line: &str) -> Option<PathBuf> {
    line.trim()
        .strip_prefix("[download] Destination: ")
        .map(|p| PathBuf::from(p.trim()))
}

/// Parse a human size such as `10.00MiB` or `512KiB` into bytes.
fn parse_size(token: &str) -> Option<u64> {
    let split = token.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = token.split_at(split);
    let value: f64 = number.parse().ok()?;

    let multiplier: f64 = match unit {
        "B" => 1.0,
        "KiB" | "KB" => 1024.0,
        "MiB" | "MB" => 1024.0 * 1024.0,
        "GiB" | "GB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" | "TB" => 1024.0_f64.powi(4),
        _ => return None,
    };

    Some((value * multiplier) as u64)
}

/// Parse `MM:SS` or `HH:MM:SS` into seconds.
fn parse_clock(token: &str) -> Option<u64> {
    let mut seconds: u64 = 0;
    for part in token.split(':') {
        seconds = seconds * 60 + part.parse::<u64>().ok()?;
    }
    Some(seconds)
}

/// yt-dlp prints the actual error on the last stderr line.
fn summary_line(text: &str) -> &str {
    text.lines().last().unwrap_or(text)
}

fn host_of(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit('@').next()?;
    Some(host.split(':').next().unwrap_or(host))
}

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::config::{Credentials, ResolvedConfig};
use crate::domain::IntegritySignal;
use crate::error::QueryError;
use crate::index::IntegrityMap;
use crate::integrity::{self, Verdict};
use crate::transport::Transport;

const REDIRECT_MARKER: &str = "url=";

#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub portal_url: String,
    pub retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub min_file_bytes: u64,
    pub session_max_age: Duration,
}

impl TransferOptions {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            portal_url: config.portal_url.clone(),
            retries: config.retries,
            retry_delay: config.retry_delay,
            timeout: config.timeout,
            min_file_bytes: config.min_file_bytes,
            session_max_age: config.session_max_age,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Skipped,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Integrity,
    MalformedPayload,
    InvalidUrl,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub url: String,
    pub filename: String,
    pub state: TransferState,
    pub succeeded: bool,
    pub attempts_made: u32,
    pub failure: Option<FailureKind>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<TransferOutcome>,
    pub downloaded: Vec<String>,
    pub failed: Vec<String>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A batch cut short by a failed sign-on. The report lists the URL in
/// progress and every URL after it as failed.
#[derive(Debug)]
pub struct AbortedBatch {
    pub report: BatchReport,
    pub error: QueryError,
}

pub struct Orchestrator<'a, T: Transport> {
    transport: &'a T,
    credentials: &'a Credentials,
    options: TransferOptions,
    target_dir: PathBuf,
    last_auth: Option<Instant>,
}

impl<'a, T: Transport> Orchestrator<'a, T> {
    pub fn new(
        transport: &'a T,
        credentials: &'a Credentials,
        options: TransferOptions,
        target_dir: &Path,
    ) -> Self {
        Self {
            transport,
            credentials,
            options,
            target_dir: target_dir.to_path_buf(),
            last_auth: None,
        }
    }

    pub fn with_session_started(mut self, at: Instant) -> Self {
        self.last_auth = Some(at);
        self
    }

    pub fn last_authenticated(&self) -> Option<Instant> {
        self.last_auth
    }

    pub fn authenticate(&mut self) -> Result<(), QueryError> {
        self.transport.authenticate(self.credentials)?;
        self.last_auth = Some(Instant::now());
        Ok(())
    }

    fn ensure_session(&mut self) -> Result<(), QueryError> {
        match self.last_auth {
            Some(at) if at.elapsed() < self.options.session_max_age => Ok(()),
            Some(at) => {
                info!(age_secs = at.elapsed().as_secs(), "refreshing portal session");
                self.authenticate()
            }
            None => self.authenticate(),
        }
    }

    pub fn run_batch<S: AsRef<str>>(
        &mut self,
        urls: &[S],
        integrity: &IntegrityMap,
        sink: &dyn ProgressSink,
    ) -> Result<BatchReport, AbortedBatch> {
        let started = Instant::now();
        let mut report = BatchReport::default();
        let total = urls.len();

        for (position, url) in urls.iter().enumerate() {
            let url = url.as_ref();
            sink.event(ProgressEvent {
                message: format!("phase=Transfer; {}/{total} {url}", position + 1),
                elapsed: Some(started.elapsed()),
            });
            let signal = integrity.get(url).or_else(|| integrity.get(&normalize_url(url)));
            let outcome = match self.transfer_one(url, signal) {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(error = %error, remaining = total - position, "sign-on failed; abandoning batch");
                    report
                        .failed
                        .extend(urls[position..].iter().map(|url| url.as_ref().to_string()));
                    return Err(AbortedBatch { report, error });
                }
            };
            if outcome.succeeded {
                report.downloaded.push(outcome.filename.clone());
            } else {
                report.failed.push(outcome.url.clone());
            }
            report.outcomes.push(outcome);
        }

        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; {} retrieved, {} failed",
                report.downloaded.len(),
                report.failed.len()
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(report)
    }

    pub fn transfer_one(
        &mut self,
        url: &str,
        signal: Option<&IntegritySignal>,
    ) -> Result<TransferOutcome, QueryError> {
        let normalized = normalize_url(url);
        let Some(filename) = local_filename(&normalized) else {
            warn!(url = %url, "cannot derive a local filename");
            return Ok(TransferOutcome {
                url: url.to_string(),
                filename: String::new(),
                state: TransferState::Failed,
                succeeded: false,
                attempts_made: 0,
                failure: Some(FailureKind::InvalidUrl),
            });
        };
        let destination = self.target_dir.join(&filename);
        let checksum = signal.and_then(IntegritySignal::checksum);
        let expected_size = signal.and_then(IntegritySignal::expected_size);

        if destination.exists()
            && !integrity::is_broken(
                &destination,
                self.options.min_file_bytes,
                checksum,
                expected_size,
            )
        {
            info!(file = %filename, "skipping; local copy is intact");
            return Ok(outcome(url, filename, TransferState::Skipped, 0, None));
        }

        let primary = request_url(&self.options.portal_url, &normalized);
        let alternate = alternate_form(&primary);
        let mut attempts_made = 0u32;
        let mut failure = None;

        for attempt in 0..=self.options.retries {
            if attempt > 0 {
                thread::sleep(self.options.retry_delay);
                debug!(file = %filename, attempt, "retrying");
            }
            self.ensure_session()?;
            let request = if attempt % 2 == 1 { &alternate } else { &primary };
            attempts_made += 1;

            if let Err(err) = self
                .transport
                .fetch(request, &destination, self.options.timeout)
            {
                warn!(file = %filename, error = %err, "transfer attempt failed");
                failure = Some(FailureKind::Transport);
                continue;
            }

            match integrity::inspect(
                &destination,
                self.options.min_file_bytes,
                checksum,
                expected_size,
            ) {
                verdict if verdict.is_intact() => {
                    return Ok(outcome(
                        url,
                        filename,
                        TransferState::Succeeded,
                        attempts_made,
                        None,
                    ));
                }
                Verdict::Markup => {
                    warn!(file = %filename, "server returned an error document instead of the file");
                    failure = Some(FailureKind::MalformedPayload);
                    break;
                }
                verdict => {
                    warn!(file = %filename, ?verdict, "downloaded file failed verification");
                    failure = Some(FailureKind::Integrity);
                }
            }
        }

        warn!(file = %filename, attempts = attempts_made, "giving up");
        Ok(outcome(
            url,
            filename,
            TransferState::Failed,
            attempts_made,
            failure,
        ))
    }
}

fn outcome(
    url: &str,
    filename: String,
    state: TransferState,
    attempts_made: u32,
    failure: Option<FailureKind>,
) -> TransferOutcome {
    TransferOutcome {
        url: url.to_string(),
        filename,
        succeeded: state != TransferState::Failed,
        state,
        attempts_made,
        failure,
    }
}

pub fn normalize_url(url: &str) -> String {
    let decoded = url.trim().replace("&amp;", "&");
    match decoded.rsplit_once(REDIRECT_MARKER) {
        Some((_, target)) if !target.is_empty() => target.to_string(),
        _ => decoded,
    }
}

pub fn local_filename(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
}

pub fn request_url(portal_url: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    let base = portal_url.trim_end_matches('/');
    if url.starts_with('/') {
        format!("{base}{url}")
    } else {
        format!("{base}/{url}")
    }
}

/// The same request with query separators entity-encoded; some portal
/// endpoints only answer one of the two spellings.
pub fn alternate_form(url: &str) -> String {
    url.replace("&amp;", "&").replace('&', "&amp;")
}

/// Writes each URL once, in first-seen order. An empty list removes the log.
pub fn write_failure_log<S: AsRef<str>>(path: &Path, urls: &[S]) -> Result<(), QueryError> {
    if urls.is_empty() {
        if path.exists() {
            fs::remove_file(path).map_err(|err| QueryError::Filesystem(err.to_string()))?;
        }
        return Ok(());
    }
    let mut seen = BTreeSet::new();
    let mut content = String::new();
    for url in urls {
        let url = url.as_ref().trim();
        if !url.is_empty() && seen.insert(url) {
            content.push_str(url);
            content.push('\n');
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| QueryError::Filesystem(err.to_string()))?;
    }
    let tmp_path = path.with_extension("log.tmp");
    fs::write(&tmp_path, content).map_err(|err| QueryError::Filesystem(err.to_string()))?;
    fs::rename(&tmp_path, path).map_err(|err| QueryError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn read_failure_log(path: &Path) -> Result<Vec<String>, QueryError> {
    let content = fs::read_to_string(path)
        .map_err(|err| QueryError::Filesystem(format!("read {}: {err}", path.display())))?;
    let mut seen = BTreeSet::new();
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_redirect_prefix() {
        assert_eq!(
            normalize_url("/ext-api/downloads/get_tape_file?blocking=true&amp;url=/Nemve1/download/a.gz"),
            "/Nemve1/download/a.gz"
        );
        assert_eq!(normalize_url("/Nemve1/a.gz"), "/Nemve1/a.gz");
        assert_eq!(
            normalize_url("/ext-api/redirect?url=/get_tape_file?url=/Nemve1/download/b.gz"),
            "/Nemve1/download/b.gz"
        );
    }

    #[test]
    fn filename_is_last_segment_without_query() {
        assert_eq!(
            local_filename("/Nemve1/download/a.fa.gz?x=1").as_deref(),
            Some("a.fa.gz")
        );
        assert_eq!(local_filename("/Nemve1/download/"), None);
    }

    #[test]
    fn request_url_joins_portal() {
        assert_eq!(
            request_url("https://genome.jgi.doe.gov/", "/Nemve1/a.gz"),
            "https://genome.jgi.doe.gov/Nemve1/a.gz"
        );
        assert_eq!(
            request_url("https://genome.jgi.doe.gov", "https://other.org/a.gz"),
            "https://other.org/a.gz"
        );
    }

    #[test]
    fn alternate_form_encodes_separators() {
        assert_eq!(alternate_form("/a?x=1&y=2"), "/a?x=1&amp;y=2");
        assert_eq!(alternate_form("/a?x=1&amp;y=2"), "/a?x=1&amp;y=2");
    }

    #[test]
    fn failure_log_round_trip_without_duplicates() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("Org_failed_downloads.log");
        write_failure_log(&path, &["/a.gz", "/b.gz", "/a.gz"]).unwrap();
        assert_eq!(read_failure_log(&path).unwrap(), vec!["/a.gz", "/b.gz"]);
        write_failure_log::<&str>(&path, &[]).unwrap();
        assert!(!path.exists());
    }
}

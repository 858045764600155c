use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;

use jgi_query::config::Credentials;
use jgi_query::domain::IntegritySignal;
use jgi_query::error::QueryError;
use jgi_query::index::IntegrityMap;
use jgi_query::integrity::md5_file;
use jgi_query::output::JsonOutput;
use jgi_query::transfer::{
    AbortedBatch, FailureKind, Orchestrator, TransferOptions, TransferState, read_failure_log,
    write_failure_log,
};
use jgi_query::transport::Transport;

const PAYLOAD: &[u8] = b">scaffold_1\nACGTACGTACGTACGTACGTACGTACGT\n";
const ERROR_PAGE: &[u8] = b"<!DOCTYPE html><html><body>Service unavailable</body></html>";

enum Step {
    Fail,
    Write(&'static [u8]),
}

/// Replays a fixed list of fetch results, then keeps failing.
#[derive(Default)]
struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    accepted_logins: Option<usize>,
    logins: Mutex<usize>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            ..Self::default()
        }
    }

    fn logins(&self) -> usize {
        *self.logins.lock().unwrap()
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn authenticate(&self, _credentials: &Credentials) -> Result<(), QueryError> {
        let mut guard = self.logins.lock().unwrap();
        *guard += 1;
        match self.accepted_logins {
            Some(limit) if *guard > limit => {
                Err(QueryError::Authentication("session rejected".to_string()))
            }
            _ => Ok(()),
        }
    }

    fn fetch(&self, url: &str, destination: &Path, _timeout: Duration) -> Result<(), QueryError> {
        self.requests.lock().unwrap().push(url.to_string());
        match self.steps.lock().unwrap().pop_front() {
            Some(Step::Write(content)) => std::fs::write(destination, content)
                .map_err(|err| QueryError::Filesystem(err.to_string())),
            Some(Step::Fail) | None => Err(QueryError::Transport("connection reset".to_string())),
        }
    }
}

fn credentials() -> Credentials {
    Credentials {
        user: "someone@example.org".to_string(),
        password: "secret".to_string(),
    }
}

fn options(retries: u32) -> TransferOptions {
    TransferOptions {
        portal_url: "https://portal.example.org".to_string(),
        retries,
        retry_delay: Duration::ZERO,
        timeout: Duration::from_secs(5),
        min_file_bytes: 20,
        session_max_age: Duration::from_secs(300),
    }
}

fn payload_checksum() -> String {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("payload");
    std::fs::write(&path, PAYLOAD).unwrap();
    md5_file(&path).unwrap()
}

#[test]
fn succeeds_on_third_attempt_after_two_transport_failures() {
    let temp = tempfile::tempdir().unwrap();
    let transport =
        ScriptedTransport::new(vec![Step::Fail, Step::Fail, Step::Write(PAYLOAD)]);
    let creds = credentials();
    let mut orchestrator = Orchestrator::new(&transport, &creds, options(3), temp.path());

    let signal = IntegritySignal::Checksum(payload_checksum());
    let outcome = orchestrator
        .transfer_one("/Org1/download/scaffolds.fasta.gz", Some(&signal))
        .unwrap();

    assert!(outcome.succeeded);
    assert_eq!(outcome.state, TransferState::Succeeded);
    assert_eq!(outcome.attempts_made, 3);
    assert!(temp.path().join("scaffolds.fasta.gz").exists());
}

#[test]
fn retries_alternate_between_request_forms() {
    let temp = tempfile::tempdir().unwrap();
    let transport =
        ScriptedTransport::new(vec![Step::Fail, Step::Fail, Step::Write(PAYLOAD)]);
    let creds = credentials();
    let mut orchestrator = Orchestrator::new(&transport, &creds, options(3), temp.path());

    orchestrator
        .transfer_one("/Org1/download/a.gz?x=1&y=2", None)
        .unwrap();

    assert_eq!(
        transport.requests(),
        vec![
            "https://portal.example.org/Org1/download/a.gz?x=1&y=2",
            "https://portal.example.org/Org1/download/a.gz?x=1&amp;y=2",
            "https://portal.example.org/Org1/download/a.gz?x=1&y=2",
        ]
    );
}

#[test]
fn exhausted_retries_are_logged_once_in_original_form() {
    let temp = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(Vec::new());
    let creds = credentials();
    let mut orchestrator = Orchestrator::new(&transport, &creds, options(2), temp.path());

    let url = "/ext-api/downloads/get_tape_file?blocking=true&amp;url=/Org1/download/b.gz";
    let report = orchestrator
        .run_batch(&[url], &IntegrityMap::new(), &JsonOutput)
        .unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.outcomes[0].attempts_made, 3);
    assert_eq!(report.outcomes[0].failure, Some(FailureKind::Transport));
    assert_eq!(report.outcomes[0].filename, "b.gz");

    let log = temp.path().join("Org1_failed_downloads.log");
    write_failure_log(&log, &report.failed).unwrap();
    let logged = read_failure_log(&log).unwrap();
    assert_eq!(logged, vec![url.to_string()]);
    let raw = std::fs::read_to_string(&log).unwrap();
    assert_eq!(raw.matches(url).count(), 1);
}

#[test]
fn error_document_is_not_retried() {
    let temp = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![Step::Write(ERROR_PAGE), Step::Write(PAYLOAD)]);
    let creds = credentials();
    let mut orchestrator = Orchestrator::new(&transport, &creds, options(3), temp.path());

    let outcome = orchestrator
        .transfer_one("/Org1/download/genes.gff.gz", None)
        .unwrap();

    assert!(!outcome.succeeded);
    assert_eq!(outcome.failure, Some(FailureKind::MalformedPayload));
    assert_eq!(outcome.attempts_made, 1);
}

#[test]
fn integrity_mismatch_is_retried() {
    let temp = tempfile::tempdir().unwrap();
    let short: &'static [u8] = b">scaffold_1\nACGTACGTACGTACGT\n";
    let transport = ScriptedTransport::new(vec![Step::Write(short), Step::Write(PAYLOAD)]);
    let creds = credentials();
    let mut orchestrator = Orchestrator::new(&transport, &creds, options(1), temp.path());

    let signal = IntegritySignal::Size(PAYLOAD.len() as u64);
    let outcome = orchestrator
        .transfer_one("/Org1/download/scaffolds.fa", Some(&signal))
        .unwrap();

    assert!(outcome.succeeded);
    assert_eq!(outcome.attempts_made, 2);
}

#[test]
fn intact_local_copy_is_skipped_without_request() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(temp.path().join("scaffolds.fasta.gz"), PAYLOAD).unwrap();
    let transport = ScriptedTransport::new(Vec::new());
    let creds = credentials();
    let mut orchestrator = Orchestrator::new(&transport, &creds, options(3), temp.path());

    let signal = IntegritySignal::Checksum(payload_checksum());
    let outcome = orchestrator
        .transfer_one("/Org1/download/scaffolds.fasta.gz", Some(&signal))
        .unwrap();

    assert_eq!(outcome.state, TransferState::Skipped);
    assert!(outcome.succeeded);
    assert_eq!(outcome.attempts_made, 0);
    assert!(transport.requests().is_empty());
    assert_eq!(transport.logins(), 0);
}

#[test]
fn stale_session_is_refreshed_before_each_request() {
    let temp = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![Step::Write(PAYLOAD), Step::Write(PAYLOAD)]);
    let creds = credentials();
    let mut opts = options(0);
    opts.session_max_age = Duration::ZERO;
    let mut orchestrator = Orchestrator::new(&transport, &creds, opts, temp.path());

    let report = orchestrator
        .run_batch(
            &["/Org1/download/a.fa", "/Org1/download/b.fa"],
            &IntegrityMap::new(),
            &JsonOutput,
        )
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.downloaded, vec!["a.fa", "b.fa"]);
    assert_eq!(transport.logins(), 2);
}

#[test]
fn fresh_session_is_reused_across_batch() {
    let temp = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![Step::Write(PAYLOAD), Step::Write(PAYLOAD)]);
    let creds = credentials();
    let mut orchestrator = Orchestrator::new(&transport, &creds, options(0), temp.path())
        .with_session_started(std::time::Instant::now());

    orchestrator
        .run_batch(
            &["/Org1/download/a.fa", "/Org1/download/b.fa"],
            &IntegrityMap::new(),
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(transport.logins(), 0);
}

#[test]
fn failed_refresh_keeps_earlier_failures_and_abandons_the_rest() {
    let temp = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport {
        accepted_logins: Some(1),
        ..ScriptedTransport::new(vec![Step::Fail])
    };
    let creds = credentials();
    let mut opts = options(0);
    opts.session_max_age = Duration::ZERO;
    let mut orchestrator = Orchestrator::new(&transport, &creds, opts, temp.path());

    let urls = ["/Org1/download/a.fa", "/Org1/download/b.fa", "/Org1/download/c.fa"];
    let aborted = orchestrator
        .run_batch(&urls, &IntegrityMap::new(), &JsonOutput)
        .unwrap_err();

    let AbortedBatch { report, error } = aborted;
    assert_matches!(error, QueryError::Authentication(_));
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].failure, Some(FailureKind::Transport));
    assert_eq!(report.failed, urls.to_vec());
    assert_eq!(transport.logins(), 2);
}

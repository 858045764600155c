use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::config::Credentials;
use crate::error::QueryError;

/// `fetch` must leave the payload at `destination` on success.
pub trait Transport: Send + Sync {
    fn authenticate(&self, credentials: &Credentials) -> Result<(), QueryError>;
    fn fetch(&self, url: &str, destination: &Path, timeout: Duration) -> Result<(), QueryError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    signon_url: String,
}

impl HttpTransport {
    pub fn new(signon_url: &str) -> Result<Self, QueryError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("jgi-query/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| QueryError::Transport(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .build()
            .map_err(|err| QueryError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            signon_url: signon_url.to_string(),
        })
    }
}

impl Transport for HttpTransport {
    fn authenticate(&self, credentials: &Credentials) -> Result<(), QueryError> {
        let response = self
            .client
            .post(&self.signon_url)
            .form(&[
                ("login", credentials.user.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .map_err(|err| QueryError::Authentication(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(QueryError::Authentication(format!(
                "sign-on returned HTTP {}",
                status.as_u16()
            )));
        }
        debug!(user = %credentials.user, "signed on");
        Ok(())
    }

    fn fetch(&self, url: &str, destination: &Path, timeout: Duration) -> Result<(), QueryError> {
        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(|err| QueryError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(QueryError::Transport(format!(
                "HTTP {} for {url}",
                response.status().as_u16()
            )));
        }
        let mut file =
            File::create(destination).map_err(|err| QueryError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| QueryError::Transport(err.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CurlTransport {
    curl: Option<PathBuf>,
    signon_url: String,
    cookie_jar: PathBuf,
}

impl CurlTransport {
    pub fn new(signon_url: &str, cookie_jar: &Path) -> Self {
        Self {
            curl: find_in_path("curl"),
            signon_url: signon_url.to_string(),
            cookie_jar: cookie_jar.to_path_buf(),
        }
    }

    pub fn cookie_jar(&self) -> &Path {
        &self.cookie_jar
    }

    fn require_curl(&self) -> Result<&PathBuf, QueryError> {
        self.curl
            .as_ref()
            .ok_or_else(|| QueryError::MissingTool("curl".to_string()))
    }

    fn login_args(&self, credentials: &Credentials) -> Vec<String> {
        vec![
            "--silent".to_string(),
            "--show-error".to_string(),
            "--fail".to_string(),
            self.signon_url.clone(),
            "--data-urlencode".to_string(),
            format!("login={}", credentials.user),
            "--data-urlencode".to_string(),
            format!("password={}", credentials.password),
            "-c".to_string(),
            self.cookie_jar.to_string_lossy().to_string(),
        ]
    }

    fn fetch_args(&self, url: &str, destination: &Path, timeout: Duration) -> Vec<String> {
        vec![
            "--silent".to_string(),
            "--show-error".to_string(),
            "--fail".to_string(),
            "--location".to_string(),
            "--max-time".to_string(),
            timeout.as_secs().max(1).to_string(),
            url.to_string(),
            "-b".to_string(),
            self.cookie_jar.to_string_lossy().to_string(),
            "-o".to_string(),
            destination.to_string_lossy().to_string(),
        ]
    }

    fn run_cmd(&self, args: &[String]) -> Result<(), String> {
        let curl = self.require_curl().map_err(|err| err.to_string())?;
        let output = Command::new(curl)
            .args(args)
            .output()
            .map_err(|err| err.to_string())?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(if stderr.is_empty() {
            format!("curl exited with {}", output.status)
        } else {
            stderr
        })
    }
}

impl Transport for CurlTransport {
    fn authenticate(&self, credentials: &Credentials) -> Result<(), QueryError> {
        self.require_curl()?;
        self.run_cmd(&self.login_args(credentials))
            .map_err(QueryError::Authentication)
    }

    fn fetch(&self, url: &str, destination: &Path, timeout: Duration) -> Result<(), QueryError> {
        self.run_cmd(&self.fetch_args(url, destination, timeout))
            .map_err(QueryError::Transport)
    }
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

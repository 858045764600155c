use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    CleanupResult, DecompressResult, DownloadResult, LoadedCatalog, ProgressEvent, ProgressSink,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary<'a> {
    pub catalog: Option<&'a LoadedCatalog>,
    pub download: Option<&'a DownloadResult>,
    pub decompress: Option<&'a DecompressResult>,
    pub cleanup: Option<&'a CleanupResult>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_catalog(result: &LoadedCatalog) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_summary(summary: &RunSummary<'_>) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        let message = event
            .message
            .split_once("; ")
            .map(|(_, rest)| rest)
            .unwrap_or(&event.message);
        match event.elapsed {
            Some(elapsed) if elapsed.as_secs() > 0 => {
                eprintln!("{message} ({}s)", elapsed.as_secs())
            }
            _ => eprintln!("{message}"),
        }
    }
}

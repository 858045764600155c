use std::fs;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{group_records, parse_catalog};
use crate::config::ResolvedConfig;
use crate::domain::Organism;
use crate::error::QueryError;
use crate::extract;
use crate::index::{CatalogView, IntegrityMap, build_index, human_size};
use crate::integrity::hidden_markup_check;
use crate::store::{FAILURE_LOG_SUFFIX, Store};
use crate::transfer::{
    AbortedBatch, BatchReport, Orchestrator, TransferOptions, read_failure_log,
    write_failure_log,
};
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadedCatalog {
    pub organism: Organism,
    pub index_path: String,
    pub fetched: bool,
    pub view: CatalogView,
    #[serde(skip)]
    pub integrity: IntegrityMap,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub organism: String,
    pub requested: Vec<String>,
    pub total_bytes: u64,
    pub total_size: String,
    pub report: BatchReport,
    pub malformed: Vec<String>,
    pub retrieved: Vec<String>,
    pub failure_log: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedItem {
    pub archive: String,
    pub produced: Vec<String>,
    pub removed_original: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DecompressResult {
    pub extracted: Vec<ExtractedItem>,
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupResult {
    pub removed: Vec<String>,
}

pub struct App<T: Transport> {
    store: Store,
    config: ResolvedConfig,
    transport: T,
    session_started: Option<Instant>,
}

impl<T: Transport> App<T> {
    pub fn new(store: Store, config: ResolvedConfig, transport: T) -> Self {
        Self {
            store,
            config,
            transport,
            session_started: None,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn catalog_url(&self, organism: &Organism) -> String {
        format!(
            "{}/portal/ext-api/downloads/get-directory?organism={organism}",
            self.config.portal_url
        )
    }

    pub fn authenticate(&mut self, sink: &dyn ProgressSink) -> Result<(), QueryError> {
        sink.event(ProgressEvent {
            message: format!("phase=Login; signing on as {}", self.config.credentials.user),
            elapsed: None,
        });
        self.transport.authenticate(&self.config.credentials)?;
        self.session_started = Some(Instant::now());
        Ok(())
    }

    /// An empty index means the portal did not accept the session.
    pub fn fetch_catalog(
        &mut self,
        organism: &Organism,
        sink: &dyn ProgressSink,
    ) -> Result<Utf8PathBuf, QueryError> {
        let fresh = self
            .session_started
            .map(|at| at.elapsed() < self.config.session_max_age)
            .unwrap_or(false);
        if !fresh {
            self.authenticate(sink)?;
        }

        let started = Instant::now();
        let url = self.catalog_url(organism);
        sink.event(ProgressEvent {
            message: format!("phase=Catalog; retrieving index for {organism}"),
            elapsed: None,
        });
        let scratch = self.store.temp_file("jgi-index")?;
        self.transport
            .fetch(&url, scratch.path(), self.config.timeout)?;
        let size = fs::metadata(scratch.path())
            .map_err(|err| QueryError::Filesystem(err.to_string()))?
            .len();
        if size == 0 {
            return Err(QueryError::Authentication(format!(
                "portal returned an empty index for {organism}"
            )));
        }
        let index_path = self.store.index_path(organism);
        Store::persist(scratch, &index_path)?;
        sink.event(ProgressEvent {
            message: format!("phase=Catalog; saved {index_path}"),
            elapsed: Some(started.elapsed()),
        });
        Ok(index_path)
    }

    pub fn load_catalog(
        &self,
        organism: Option<&Organism>,
        index_path: &Utf8Path,
        filter_categories: bool,
    ) -> Result<LoadedCatalog, QueryError> {
        let address = organism
            .map(|organism| self.catalog_url(organism))
            .unwrap_or_else(|| index_path.to_string());
        let bytes = fs::read(index_path.as_std_path())
            .map_err(|err| QueryError::Filesystem(format!("read {index_path}: {err}")))?;
        let document = String::from_utf8(bytes).map_err(|err| QueryError::CatalogParse {
            message: format!("index is not text: {err}"),
            address: address.clone(),
        })?;
        let parsed = parse_catalog(&document, &address)?;

        let organism = match (organism, parsed.dataset_name.as_deref()) {
            (Some(organism), _) => organism.clone(),
            (None, Some(name)) => name.parse()?,
            (None, None) => return Err(QueryError::NoOrganism),
        };

        let allow_list = filter_categories.then_some(self.config.categories.as_slice());
        let grouped = group_records(&parsed, allow_list);
        if grouped.is_empty() {
            let categories = if filter_categories {
                self.config.categories.join(", ")
            } else {
                "any".to_string()
            };
            return Err(QueryError::NoResults {
                organism: organism.to_string(),
                categories,
            });
        }

        let dataset = parsed
            .dataset_name
            .clone()
            .unwrap_or_else(|| organism.to_string());
        let (view, integrity) = build_index(&dataset, &grouped);
        info!(
            organism = %organism,
            files = view.files().count(),
            verifiable = integrity.len(),
            "catalog indexed"
        );
        Ok(LoadedCatalog {
            organism,
            index_path: index_path.to_string(),
            fetched: false,
            view,
            integrity,
        })
    }

    pub fn catalog(
        &mut self,
        organism: Option<&Organism>,
        local_index: Option<&Utf8Path>,
        filter_categories: bool,
        sink: &dyn ProgressSink,
    ) -> Result<LoadedCatalog, QueryError> {
        if let Some(path) = local_index {
            return self.load_catalog(organism, path, filter_categories);
        }
        let organism = organism.ok_or(QueryError::NoOrganism)?;
        let index_path = self.fetch_catalog(organism, sink)?;
        let mut loaded = self.load_catalog(Some(organism), &index_path, filter_categories)?;
        loaded.fetched = true;
        Ok(loaded)
    }

    fn run_batch(
        &mut self,
        urls: &[String],
        integrity: &IntegrityMap,
        sink: &dyn ProgressSink,
    ) -> (BatchReport, Option<QueryError>) {
        let options = TransferOptions::from_config(&self.config);
        let mut orchestrator = Orchestrator::new(
            &self.transport,
            &self.config.credentials,
            options,
            self.store.root().as_std_path(),
        );
        if let Some(at) = self.session_started {
            orchestrator = orchestrator.with_session_started(at);
        }
        let result = match orchestrator.run_batch(urls, integrity, sink) {
            Ok(report) => (report, None),
            Err(AbortedBatch { report, error }) => (report, Some(error)),
        };
        self.session_started = orchestrator.last_authenticated();
        result
    }

    pub fn download(
        &mut self,
        catalog: &LoadedCatalog,
        urls: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, QueryError> {
        self.store.ensure_root()?;
        let (report, aborted) = self.run_batch(urls, &catalog.integrity, sink);
        let log_path = self.store.failure_log_path(&catalog.organism);
        let failure_log = if report.failed.is_empty() {
            None
        } else {
            write_failure_log(log_path.as_std_path(), &report.failed)?;
            warn!(log = %log_path, failed = report.failed.len(), "some files could not be retrieved");
            Some(log_path.to_string())
        };
        if let Some(error) = aborted {
            return Err(error);
        }
        let total_bytes = catalog.view.total_size(urls);
        Ok(self.finish_download(
            catalog.organism.to_string(),
            urls.to_vec(),
            total_bytes,
            report,
            failure_log,
        ))
    }

    pub fn retry_failed(
        &mut self,
        log_path: &Utf8Path,
        catalog: Option<&LoadedCatalog>,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, QueryError> {
        let urls = read_failure_log(log_path.as_std_path())?;
        sink.event(ProgressEvent {
            message: format!("phase=Resume; {} files from {log_path}", urls.len()),
            elapsed: None,
        });
        let empty = IntegrityMap::new();
        let integrity = catalog.map(|catalog| &catalog.integrity).unwrap_or(&empty);
        let (report, aborted) = self.run_batch(&urls, integrity, sink);
        write_failure_log(log_path.as_std_path(), &report.failed)?;
        if let Some(error) = aborted {
            return Err(error);
        }
        let failure_log = (!report.failed.is_empty()).then(|| log_path.to_string());
        let total_bytes = catalog
            .map(|catalog| catalog.view.total_size(&urls))
            .unwrap_or(0);
        let organism = catalog
            .map(|catalog| catalog.organism.to_string())
            .or_else(|| {
                log_path
                    .file_stem()
                    .and_then(|stem| stem.strip_suffix(FAILURE_LOG_SUFFIX))
                    .map(str::to_string)
            })
            .unwrap_or_default();
        Ok(self.finish_download(organism, urls, total_bytes, report, failure_log))
    }

    fn finish_download(
        &self,
        organism: String,
        requested: Vec<String>,
        total_bytes: u64,
        report: BatchReport,
        failure_log: Option<String>,
    ) -> DownloadResult {
        let paths = report
            .downloaded
            .iter()
            .map(|name| self.store.file_path(name).into_std_path_buf())
            .collect::<Vec<_>>();
        let (clean, malformed) = hidden_markup_check(&paths);
        let to_names = |paths: Vec<std::path::PathBuf>| {
            paths
                .into_iter()
                .map(|path| path.to_string_lossy().to_string())
                .collect::<Vec<_>>()
        };
        DownloadResult {
            organism,
            requested,
            total_bytes,
            total_size: human_size(total_bytes),
            report,
            malformed: to_names(malformed),
            retrieved: to_names(clean),
            failure_log,
        }
    }

    pub fn decompress(
        &self,
        files: &[String],
        keep_original: bool,
        sink: &dyn ProgressSink,
    ) -> DecompressResult {
        let mut result = DecompressResult::default();
        for file in files {
            let path = std::path::Path::new(file);
            sink.event(ProgressEvent {
                message: format!("phase=Decompress; {file}"),
                elapsed: None,
            });
            match extract::decompress(path) {
                Ok(Some(produced)) => {
                    let removed_original = !keep_original && fs::remove_file(path).is_ok();
                    result.extracted.push(ExtractedItem {
                        archive: file.clone(),
                        produced: produced
                            .into_iter()
                            .map(|path| path.to_string_lossy().to_string())
                            .collect(),
                        removed_original,
                    });
                }
                Ok(None) => result.skipped.push(file.clone()),
                Err(err) => {
                    warn!(file = %file, error = %err, "decompression failed");
                    result.errors.push(err.to_string());
                }
            }
        }
        result
    }

    pub fn cleanup(&self, catalog: Option<&LoadedCatalog>) -> Result<CleanupResult, QueryError> {
        let mut paths = vec![self.store.cookie_path()];
        if let Some(catalog) = catalog.filter(|catalog| catalog.fetched) {
            paths.push(Utf8PathBuf::from(&catalog.index_path));
        }
        let removed = Store::remove_files(&paths)?;
        Ok(CleanupResult {
            removed: removed.into_iter().map(|path| path.to_string()).collect(),
        })
    }
}

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::{Builder, NamedTempFile};

use crate::domain::Organism;
use crate::error::QueryError;

pub const COOKIE_FILE_NAME: &str = "cookies";
pub const FAILURE_LOG_SUFFIX: &str = "_failed_downloads";

#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, QueryError> {
        let cwd = std::env::current_dir().map_err(|err| QueryError::Filesystem(err.to_string()))?;
        let root = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|_| QueryError::Filesystem("invalid working directory path".to_string()))?;
        Ok(Self { root })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn index_path(&self, organism: &Organism) -> Utf8PathBuf {
        self.root.join(format!("{organism}_jgi_index.xml"))
    }

    pub fn failure_log_path(&self, organism: &Organism) -> Utf8PathBuf {
        self.root.join(format!("{organism}{FAILURE_LOG_SUFFIX}.log"))
    }

    pub fn cookie_path(&self) -> Utf8PathBuf {
        self.root.join(COOKIE_FILE_NAME)
    }

    pub fn file_path(&self, filename: &str) -> Utf8PathBuf {
        self.root.join(filename)
    }

    pub fn ensure_root(&self) -> Result<(), QueryError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| QueryError::Filesystem(err.to_string()))
    }

    pub fn temp_file(&self, prefix: &str) -> Result<NamedTempFile, QueryError> {
        self.ensure_root()?;
        Builder::new()
            .prefix(prefix)
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| QueryError::Filesystem(err.to_string()))
    }

    pub fn persist(temp: NamedTempFile, dest: &Utf8Path) -> Result<(), QueryError> {
        if dest.as_std_path().exists() {
            fs::remove_file(dest.as_std_path())
                .map_err(|err| QueryError::Filesystem(err.to_string()))?;
        }
        temp.persist(dest.as_std_path())
            .map_err(|err| QueryError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn remove_files(paths: &[Utf8PathBuf]) -> Result<Vec<Utf8PathBuf>, QueryError> {
        let mut removed = Vec::new();
        for path in paths {
            if path.as_std_path().is_file() {
                fs::remove_file(path.as_std_path())
                    .map_err(|err| QueryError::Filesystem(err.to_string()))?;
                removed.push(path.clone());
            }
        }
        Ok(removed)
    }
}

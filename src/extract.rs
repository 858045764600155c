use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tar::Archive;
use zip::ZipArchive;

use crate::error::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Gzip,
    Zip,
}

impl ArchiveKind {
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if name.ends_with(".gz") {
            Some(ArchiveKind::Gzip)
        } else if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else {
            None
        }
    }

    fn suffix_len(self, name: &str) -> usize {
        let lower = name.to_ascii_lowercase();
        match self {
            ArchiveKind::TarGz if lower.ends_with(".tgz") => 4,
            ArchiveKind::TarGz => 7,
            ArchiveKind::Gzip => 3,
            ArchiveKind::Zip => 4,
        }
    }
}

pub fn strip_archive_suffix(path: &Path, kind: ArchiveKind) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = &name[..name.len().checked_sub(kind.suffix_len(name))?];
    if stem.is_empty() {
        return None;
    }
    Some(path.with_file_name(stem))
}

/// `None` for files that are not a recognised archive.
pub fn decompress(path: &Path) -> Result<Option<Vec<PathBuf>>, QueryError> {
    let Some(kind) = ArchiveKind::detect(path) else {
        return Ok(None);
    };
    let target = strip_archive_suffix(path, kind).ok_or_else(|| QueryError::Extract {
        path: path.to_path_buf(),
        message: "archive name has no stem".to_string(),
    })?;
    let produced = match kind {
        ArchiveKind::Gzip => extract_gzip(path, &target)?,
        ArchiveKind::TarGz => extract_tar_gz(path, &target)?,
        ArchiveKind::Zip => {
            extract_zip(path, &target)?;
            vec![target]
        }
    };
    Ok(Some(produced))
}

fn extract_error(path: &Path) -> impl Fn(io::Error) -> QueryError + '_ {
    move |err| QueryError::Extract {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn extract_gzip(path: &Path, target: &Path) -> Result<Vec<PathBuf>, QueryError> {
    let file = File::open(path).map_err(extract_error(path))?;
    let mut decoder = MultiGzDecoder::new(BufReader::new(file));
    let mut out = File::create(target).map_err(extract_error(path))?;
    if let Err(err) = io::copy(&mut decoder, &mut out) {
        drop(out);
        let _ = fs::remove_file(target);
        return Err(extract_error(path)(err));
    }
    Ok(vec![target.to_path_buf()])
}

fn open_tarball(path: &Path) -> Result<Archive<MultiGzDecoder<BufReader<File>>>, QueryError> {
    let file = File::open(path).map_err(extract_error(path))?;
    Ok(Archive::new(MultiGzDecoder::new(BufReader::new(file))))
}

fn extract_tar_gz(path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>, QueryError> {
    let mut tops = Vec::new();
    let mut file_count = 0usize;
    let mut archive = open_tarball(path)?;
    for entry in archive.entries().map_err(extract_error(path))? {
        let entry = entry.map_err(extract_error(path))?;
        let entry_path = entry.path().map_err(extract_error(path))?.into_owned();
        if !entry.header().entry_type().is_dir() {
            file_count += 1;
        }
        if let Some(Component::Normal(top)) = entry_path
            .components()
            .find(|component| matches!(component, Component::Normal(_)))
        {
            let top = PathBuf::from(top);
            if !tops.contains(&top) {
                tops.push(top);
            }
        }
    }

    let destination = if file_count > 1 {
        fs::create_dir_all(target_dir).map_err(extract_error(path))?;
        target_dir.to_path_buf()
    } else {
        path.parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    };

    let mut archive = open_tarball(path)?;
    for entry in archive.entries().map_err(extract_error(path))? {
        let mut entry = entry.map_err(extract_error(path))?;
        let unpacked = entry.unpack_in(&destination).map_err(extract_error(path))?;
        if !unpacked {
            return Err(QueryError::Extract {
                path: path.to_path_buf(),
                message: "tar entry path traversal detected".to_string(),
            });
        }
    }

    if file_count > 1 {
        Ok(vec![destination])
    } else {
        Ok(tops.into_iter().map(|top| destination.join(top)).collect())
    }
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), QueryError> {
    let zip_error = |message: String| QueryError::Extract {
        path: zip_path.to_path_buf(),
        message,
    };
    let file = File::open(zip_path).map_err(|err| zip_error(err.to_string()))?;
    let mut archive = ZipArchive::new(file).map_err(|err| zip_error(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| zip_error(err.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(zip_error("zip entry path traversal detected".to_string()));
        };
        let entry_path = target_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&entry_path).map_err(|err| zip_error(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| zip_error(err.to_string()))?;
        }
        let mut outfile = File::create(&entry_path).map_err(|err| zip_error(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| zip_error(err.to_string()))?;
    }
    Ok(())
}

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum QueryError {
    #[error("cannot parse catalog document or no organism match found: {message}")]
    #[diagnostic(help("ensure the remote index exists and has content at {address}"))]
    CatalogParse { message: String, address: String },

    #[error("can't parse selection input near '{fragment}'")]
    #[diagnostic(help("use <category>:<i>[,<i>];<category>:<i>-<i>, e.g. '3:4,5;7:1-10,13'"))]
    SelectionSyntax { fragment: String },

    #[error("selection refers to unknown entry {category}:{index}")]
    UnknownCoordinate { category: u32, index: u32 },

    #[error("invalid filename pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("authentication failed: {0}")]
    #[diagnostic(help("invalid username/password combination; rerun with --configure to reset credentials"))]
    Authentication(String),

    #[error("missing config file at {0}")]
    #[diagnostic(help("run with --configure to create it"))]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("config file present ({0}) but user and/or password not found")]
    #[diagnostic(help("run with --configure to set credentials"))]
    MissingCredentials(PathBuf),

    #[error("invalid organism: {0}")]
    InvalidOrganism(String),

    #[error("no organism specified")]
    NoOrganism,

    #[error("no results found for '{organism}' in any of the following categories: {categories}")]
    NoResults { organism: String, categories: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to decompress {path}: {message}")]
    Extract { path: PathBuf, message: String },

    #[error("aborted by user")]
    Aborted,
}

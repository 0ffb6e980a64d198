//! Error taxonomy for the conversion pipeline
//!
//! Conversion errors are structural: the converter found something in the
//! script it cannot statically understand. They abort the whole run; partial
//! output is left on disk for manual inspection.

use std::path::PathBuf;

use thiserror::Error;

/// A structural failure during script-to-project conversion
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The destination directory already exists; a fresh destination is
    /// required per run to avoid partial-state corruption
    #[error("destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("could not run django-admin: {0}")]
    Scaffold(String),

    #[error("django-admin startproject failed: {0}")]
    ScaffoldFailed(String),

    #[error("could not parse script: {0}")]
    Parse(String),

    #[error("no app instance found - expected a top-level `app = Django(...)` assignment")]
    AppNotFound,

    /// A name was referenced but resolves to neither a live definition nor a
    /// top-level assignment in the script
    #[error("reference to undetermined symbol {0}")]
    UndeterminedSymbol(String),

    #[error("could not understand route {0}")]
    UnparseableRoute(String),

    #[error("found more than one admin decorator on model {0}")]
    MultipleAdminDecorators(String),

    #[error("unrecognised @{app}.admin argument: {src}")]
    BadAdminArgument { app: String, src: String },

    #[error("unexpected start to settings.py - expected a leading docstring")]
    UnexpectedSettings,

    #[error("expected to find {0} in urls.py")]
    UrlconfPatternMissing(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ConvertResult<T> = Result<T, ConversionError>;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PdbFetchError {
    #[error("invalid PDB entry: {0}")]
    InvalidPdbId(String),

    #[error("invalid UniProt entry: {0}")]
    InvalidUniprotId(String),

    #[error("invalid label: {0}")]
    InvalidLabel(String),

    #[error("RCSB request failed: {0}")]
    RcsbHttp(String),

    #[error("RCSB returned status {status}: {message}")]
    RcsbStatus { status: u16, message: String },

    #[error("UniProt request failed: {0}")]
    UniprotHttp(String),

    #[error("UniProt returned status {status}: {message}")]
    UniprotStatus { status: u16, message: String },

    #[error("unreadable record: {0}")]
    Record(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

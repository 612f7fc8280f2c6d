use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GitabaseError {
    #[error("invalid gitabase identifier: {0}")]
    InvalidIdentifier(String),

    #[error("unknown gitabase: {0}")]
    UnknownGitabase(String),

    #[error("failed to open gitabase {path}: {message}")]
    OpenDatabase { path: String, message: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("connection cache is shut down")]
    CacheClosed,

    #[error("download request failed: {0}")]
    HttpTransport(String),

    #[error("download returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("download cancelled")]
    Cancelled,

    #[error("archive error: {0}")]
    Archive(String),

    #[error("import produced no readable gitabase files")]
    EmptyImport,

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to parse preferences file: {0}")]
    PrefsParse(String),
}

impl GitabaseError {
    /// Coarse kind tag carried by pipeline failure states and CLI exit codes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GitabaseError::InvalidIdentifier(_) => ErrorKind::InvalidIdentifier,
            GitabaseError::UnknownGitabase(_) => ErrorKind::NotFound,
            GitabaseError::OpenDatabase { .. } => ErrorKind::Open,
            GitabaseError::Database(_) => ErrorKind::Database,
            GitabaseError::CacheClosed => ErrorKind::Database,
            GitabaseError::HttpTransport(_) | GitabaseError::HttpStatus { .. } => ErrorKind::Http,
            GitabaseError::Cancelled => ErrorKind::Cancelled,
            GitabaseError::Archive(_) => ErrorKind::Archive,
            GitabaseError::EmptyImport => ErrorKind::EmptyImport,
            GitabaseError::Filesystem(_) | GitabaseError::PrefsParse(_) => ErrorKind::Io,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidIdentifier,
    NotFound,
    Open,
    Database,
    Http,
    Cancelled,
    Archive,
    EmptyImport,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidIdentifier => "invalid-identifier",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Open => "open",
            ErrorKind::Database => "database",
            ErrorKind::Http => "http",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Archive => "archive",
            ErrorKind::EmptyImport => "empty-import",
            ErrorKind::Io => "io",
        };
        write!(f, "{name}")
    }
}

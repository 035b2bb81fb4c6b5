use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FqError>;

/// What exactly went wrong while framing a FASTQ record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatErrorKind {
    #[error("expected '@' at record start, found {found:?}")]
    BadHeader { found: char },
    #[error("expected '+' separator line, found {found:?}")]
    BadSeparator { found: char },
    #[error("invalid sequence character {found:?}")]
    BadSequence { found: char },
    #[error("sequence length {seq} does not match quality length {qual}")]
    UnequalLengths { seq: usize, qual: usize },
    #[error("truncated record at end of input")]
    Truncated,
}

impl FormatErrorKind {
    /// A truncated tail or a length mismatch could in principle be skipped
    /// by a lenient caller; broken framing leaves the parser without a
    /// resynchronization point.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FormatErrorKind::BadSequence { .. }
                | FormatErrorKind::UnequalLengths { .. }
                | FormatErrorKind::Truncated
        )
    }
}

/// All failure modes of a pipeline run.
///
/// `Canceled` is the outcome of cooperative cancellation, not a fault;
/// the CLI maps it to exit code 130 while everything else exits 1.
#[derive(Debug, Error)]
pub enum FqError {
    #[error("{source} at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{kind} at {}:{offset}", path.display())]
    Format {
        kind: FormatErrorKind,
        path: PathBuf,
        offset: u64,
    },

    #[error("{0}")]
    UnsupportedFormat(String),

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Resource(String),

    #[error("canceled")]
    Canceled,
}

impl FqError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FqError::Io {
            path: path.into(),
            source,
        }
    }

    /// Short kind tag used in the CLI diagnostic line.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FqError::Io { .. } => "io",
            FqError::Format { .. } => "format",
            FqError::UnsupportedFormat(_) => "unsupported-format",
            FqError::Config(_) => "config",
            FqError::Resource(_) => "resource",
            FqError::Canceled => "canceled",
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, FqError::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn format_error_carries_location() {
        let err = FqError::Format {
            kind: FormatErrorKind::BadHeader { found: 'x' },
            path: Path::new("reads.fq").to_path_buf(),
            offset: 120,
        };
        let msg = err.to_string();
        assert!(msg.contains("reads.fq:120"), "{msg}");
        assert!(msg.contains('@'), "{msg}");
        assert_eq!(err.kind_name(), "format");
    }

    #[test]
    fn recoverable_split() {
        assert!(FormatErrorKind::Truncated.is_recoverable());
        assert!(FormatErrorKind::BadSequence { found: 'x' }.is_recoverable());
        assert!(!FormatErrorKind::BadHeader { found: 'x' }.is_recoverable());
        assert!(!FormatErrorKind::BadSeparator { found: 'x' }.is_recoverable());
    }

    #[test]
    fn canceled_is_not_a_fault() {
        assert!(FqError::Canceled.is_canceled());
        assert_eq!(FqError::Canceled.kind_name(), "canceled");
        assert!(!FqError::Config("bad".into()).is_canceled());
    }
}

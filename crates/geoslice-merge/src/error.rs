use std::path::PathBuf;

/// Why a merge was refused or failed
#[derive(Debug)]
pub enum MergeError {
    /// Empty input list
    NoInputs,
    /// An input artifact does not exist
    Missing(PathBuf),
    /// An input could not be decoded
    Corrupt { path: PathBuf, message: String },
    /// An input lacks the concatenation dimension
    MissingDimension { path: PathBuf, dimension: String },
    /// An input's columns differ from the first input's
    SchemaMismatch { path: PathBuf, message: String },
    /// An input does not start strictly after the previous one ended
    Overlap {
        path: PathBuf,
        previous_end: String,
        start: String,
    },
    Io(std::io::Error),
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoInputs => write!(f, "nothing to merge"),
            Self::Missing(path) => write!(f, "missing artifact: {}", path.display()),
            Self::Corrupt { path, message } => {
                write!(f, "unreadable artifact {}: {message}", path.display())
            }
            Self::MissingDimension { path, dimension } => write!(
                f,
                "artifact {} has no '{dimension}' column",
                path.display()
            ),
            Self::SchemaMismatch { path, message } => {
                write!(f, "schema mismatch in {}: {message}", path.display())
            }
            Self::Overlap {
                path,
                previous_end,
                start,
            } => write!(
                f,
                "artifact {} starts at {start}, not after previous end {previous_end}",
                path.display()
            ),
            Self::Io(e) => write!(f, "IO: {e}"),
        }
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MergeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

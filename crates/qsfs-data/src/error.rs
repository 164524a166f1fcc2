use thiserror::Error;

/// Errors produced by the data layer.
#[derive(Debug, Error)]
pub enum DataError {
    /// The path does not satisfy the canonical form.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// Offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No entry at the given path.
    #[error("no such entry: {path}")]
    NotFound {
        /// Looked-up path.
        path: String,
    },

    /// An entry already occupies the given path.
    #[error("entry already exists: {path}")]
    AlreadyExists {
        /// Conflicting path.
        path: String,
    },

    /// A directory operation was applied to a non-directory.
    #[error("not a directory: {path}")]
    NotDirectory {
        /// Offending path.
        path: String,
    },

    /// A file operation was applied to a directory.
    #[error("is a directory: {path}")]
    IsDirectory {
        /// Offending path.
        path: String,
    },

    /// Directory removal requires an empty directory.
    #[error("directory not empty: {path}")]
    NotEmpty {
        /// Offending path.
        path: String,
    },

    /// The page cache byte budget cannot accommodate the request.
    #[error("cache budget exceeded: need {need} bytes, budget {budget}")]
    CacheFull {
        /// Bytes required.
        need: u64,
        /// Configured budget.
        budget: u64,
    },

    /// A requested in-bounds range is not fully resident in the cache.
    #[error("incomplete cached data for {path} [offset={offset}, size={size}]")]
    IncompleteData {
        /// File path.
        path: String,
        /// Range start.
        offset: u64,
        /// Range length.
        size: u64,
    },

    /// The backing metadata for a node was evicted from the registry.
    #[error("metadata evicted for {path}")]
    MetadataEvicted {
        /// Path whose metadata is gone.
        path: String,
    },

    /// Underlying filesystem error from a spilled page.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for the data layer.
pub type Result<T> = std::result::Result<T, DataError>;

impl DataError {
    /// Map to the POSIX error code reported at the FUSE boundary.
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            DataError::InvalidPath { .. } => EINVAL,
            DataError::NotFound { .. } => ENOENT,
            DataError::AlreadyExists { .. } => EEXIST,
            DataError::NotDirectory { .. } => ENOTDIR,
            DataError::IsDirectory { .. } => EISDIR,
            DataError::NotEmpty { .. } => ENOTEMPTY,
            DataError::CacheFull { .. } => ENOSPC,
            DataError::IncompleteData { .. } => EIO,
            DataError::MetadataEvicted { .. } => ESTALE,
            DataError::Io(e) => e.raw_os_error().unwrap_or(EIO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_path_errno() {
        let err = DataError::InvalidPath {
            path: "foo".to_string(),
            reason: "relative".to_string(),
        };
        assert_eq!(err.to_errno(), libc::EINVAL);
    }

    #[test]
    fn test_not_found_errno() {
        let err = DataError::NotFound {
            path: "/a".to_string(),
        };
        assert_eq!(err.to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_cache_full_errno() {
        let err = DataError::CacheFull {
            need: 10,
            budget: 5,
        };
        assert_eq!(err.to_errno(), libc::ENOSPC);
    }

    #[test]
    fn test_incomplete_data_errno() {
        let err = DataError::IncompleteData {
            path: "/a".to_string(),
            offset: 0,
            size: 10,
        };
        assert_eq!(err.to_errno(), libc::EIO);
    }

    #[test]
    fn test_io_errno_passthrough() {
        let err = DataError::Io(std::io::Error::from_raw_os_error(libc::EMFILE));
        assert_eq!(err.to_errno(), libc::EMFILE);
    }

    #[test]
    fn test_display_messages_non_empty() {
        let errors = [
            DataError::NotFound {
                path: "/x".to_string(),
            },
            DataError::AlreadyExists {
                path: "/x".to_string(),
            },
            DataError::NotEmpty {
                path: "/d/".to_string(),
            },
            DataError::MetadataEvicted {
                path: "/x".to_string(),
            },
        ];
        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }
}

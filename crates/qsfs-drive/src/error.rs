use thiserror::Error;

use qsfs_client::ClientError;
use qsfs_data::DataError;

/// Errors surfaced by the drive façade. The FUSE adapter translates
/// them with [`DriveError::to_errno`].
#[derive(Debug, Error)]
pub enum DriveError {
    /// A data-layer failure (tree, cache, metadata).
    #[error(transparent)]
    Data(#[from] DataError),

    /// An object store failure.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The bucket was unreachable at mount time.
    #[error("bucket {bucket} unreachable: {reason}")]
    Unreachable {
        /// Bucket name.
        bucket: String,
        /// The underlying failure.
        reason: String,
    },

    /// Write to a file that was never opened.
    #[error("file not open: {path}")]
    NotOpen {
        /// Offending path.
        path: String,
    },

    /// A read or write larger than the cache budget.
    #[error("request of {size} bytes exceeds the cache budget of {budget}")]
    TooLarge {
        /// Requested size.
        size: u64,
        /// Configured budget.
        budget: u64,
    },

    /// A transfer finished in a non-completed state.
    #[error("transfer of {path} failed")]
    TransferFailed {
        /// Transferred path.
        path: String,
    },
}

/// Result alias for drive operations.
pub type DriveResult<T> = std::result::Result<T, DriveError>;

impl DriveError {
    /// Map to the POSIX error code handed back through FUSE.
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            DriveError::Data(e) => e.to_errno(),
            DriveError::Client(e) => e.to_errno(),
            DriveError::Unreachable { .. } => EIO,
            DriveError::NotOpen { .. } => EBADF,
            DriveError::TooLarge { .. } => ENOSPC,
            DriveError::TransferFailed { .. } => EIO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_errno_passthrough() {
        let err = DriveError::Data(DataError::NotFound {
            path: "/a".to_string(),
        });
        assert_eq!(err.to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_client_errno_passthrough() {
        let err = DriveError::Client(ClientError::AccessDenied {
            context: "x".into(),
        });
        assert_eq!(err.to_errno(), libc::EACCES);
    }

    #[test]
    fn test_drive_specific_errnos() {
        assert_eq!(
            DriveError::NotOpen {
                path: "/a".to_string()
            }
            .to_errno(),
            libc::EBADF
        );
        assert_eq!(
            DriveError::TooLarge {
                size: 10,
                budget: 5
            }
            .to_errno(),
            libc::ENOSPC
        );
        assert_eq!(
            DriveError::TransferFailed {
                path: "/a".to_string()
            }
            .to_errno(),
            libc::EIO
        );
        assert_eq!(
            DriveError::Unreachable {
                bucket: "b".to_string(),
                reason: "down".to_string()
            }
            .to_errno(),
            libc::EIO
        );
    }
}

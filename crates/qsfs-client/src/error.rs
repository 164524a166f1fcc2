use thiserror::Error;

/// Errors surfaced by the object store client and the transfer engine.
///
/// Transient variants are retried per [`crate::retry::RetryPolicy`];
/// permanent variants surface straight to the caller as POSIX codes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The HTTP layer timed out; retryable.
    #[error("request timed out: {context}")]
    Timeout {
        /// What was being attempted.
        context: String,
    },

    /// The service answered with a 5xx; retryable.
    #[error("service unavailable (status {status}): {context}")]
    ServiceUnavailable {
        /// HTTP status code.
        status: u16,
        /// What was being attempted.
        context: String,
    },

    /// The service asked us to slow down; retryable.
    #[error("request throttled: {context}")]
    Throttled {
        /// What was being attempted.
        context: String,
    },

    /// No object at the key.
    #[error("no such key: {key}")]
    KeyNotFound {
        /// Requested key.
        key: String,
    },

    /// The bucket does not exist or is unreachable.
    #[error("no such bucket: {bucket}")]
    BucketNotFound {
        /// Requested bucket.
        bucket: String,
    },

    /// Credentials rejected or insufficient permission.
    #[error("access denied: {context}")]
    AccessDenied {
        /// What was being attempted.
        context: String,
    },

    /// The byte range is not satisfiable.
    #[error("invalid range [{offset}, {offset}+{size}) for {key}")]
    InvalidRange {
        /// Requested key.
        key: String,
        /// Range start.
        offset: u64,
        /// Range length.
        size: u64,
    },

    /// A malformed request the service rejected outright.
    #[error("invalid argument: {context}")]
    InvalidArgument {
        /// What was wrong.
        context: String,
    },

    /// No multipart session with the given id.
    #[error("no such upload session {upload_id} for {key}")]
    UploadNotFound {
        /// Object key.
        key: String,
        /// Multipart upload id.
        upload_id: String,
    },

    /// The object changed under an in-flight upload completion.
    #[error("etag mismatch for {key}: expected {expected}, found {actual}")]
    EtagMismatch {
        /// Object key.
        key: String,
        /// Entity tag the caller based its work on.
        expected: String,
        /// Entity tag the store currently reports.
        actual: String,
    },

    /// The operation was cancelled cooperatively.
    #[error("operation cancelled: {context}")]
    Cancelled {
        /// What was cancelled.
        context: String,
    },

    /// Anything the other variants do not describe.
    #[error("client internal error: {0}")]
    Internal(String),
}

/// Result alias for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// True for transient network/service failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout { .. }
                | ClientError::ServiceUnavailable { .. }
                | ClientError::Throttled { .. }
        )
    }

    /// Map to the POSIX error code reported at the FUSE boundary.
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            ClientError::Timeout { .. } => ETIMEDOUT,
            ClientError::ServiceUnavailable { .. } => EAGAIN,
            ClientError::Throttled { .. } => EAGAIN,
            ClientError::KeyNotFound { .. } => ENOENT,
            ClientError::BucketNotFound { .. } => ENOENT,
            ClientError::AccessDenied { .. } => EACCES,
            ClientError::InvalidRange { .. } => EINVAL,
            ClientError::InvalidArgument { .. } => EINVAL,
            ClientError::UploadNotFound { .. } => ENOENT,
            ClientError::EtagMismatch { .. } => EIO,
            ClientError::Cancelled { .. } => EINTR,
            ClientError::Internal(_) => EIO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(ClientError::Timeout {
            context: "x".into()
        }
        .is_retryable());
        assert!(ClientError::ServiceUnavailable {
            status: 503,
            context: "x".into()
        }
        .is_retryable());
        assert!(ClientError::Throttled {
            context: "x".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_permanent_errors_are_not_retryable() {
        assert!(!ClientError::KeyNotFound { key: "k".into() }.is_retryable());
        assert!(!ClientError::AccessDenied {
            context: "x".into()
        }
        .is_retryable());
        assert!(!ClientError::InvalidRange {
            key: "k".into(),
            offset: 0,
            size: 1
        }
        .is_retryable());
        assert!(!ClientError::EtagMismatch {
            key: "k".into(),
            expected: "a".into(),
            actual: "b".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(
            ClientError::KeyNotFound { key: "k".into() }.to_errno(),
            libc::ENOENT
        );
        assert_eq!(
            ClientError::AccessDenied {
                context: "x".into()
            }
            .to_errno(),
            libc::EACCES
        );
        assert_eq!(
            ClientError::InvalidArgument {
                context: "x".into()
            }
            .to_errno(),
            libc::EINVAL
        );
        assert_eq!(
            ClientError::EtagMismatch {
                key: "k".into(),
                expected: "a".into(),
                actual: "b".into()
            }
            .to_errno(),
            libc::EIO
        );
        assert_eq!(
            ClientError::Cancelled {
                context: "x".into()
            }
            .to_errno(),
            libc::EINTR
        );
    }
}

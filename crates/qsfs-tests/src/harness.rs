use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use qsfs_client::object_client::ObjectClient;
use qsfs_client::MockObjectClient;
use qsfs_drive::{Drive, Options};

/// A drive mounted over the in-memory mock store, with its scratch
/// directory kept alive for the test's duration.
pub struct TestMount {
    /// The mounted drive.
    pub drive: Arc<Drive>,
    /// The backing mock store.
    pub client: Arc<MockObjectClient>,
    _scratch: TempDir,
}

impl TestMount {
    /// Mount with default options.
    pub async fn new() -> TestMount {
        Self::with_options(|_| {}).await
    }

    /// Mount with options adjusted by `tweak`.
    pub async fn with_options<F>(tweak: F) -> TestMount
    where
        F: FnOnce(&mut Options),
    {
        let scratch = tempfile::tempdir().expect("scratch dir");
        let mut options = Options {
            bucket: "test-bucket".to_string(),
            cache_temporary_directory: scratch.path().join("cache"),
            retry_scale_ms: 1,
            ..Options::default()
        };
        tweak(&mut options);
        let client = Arc::new(MockObjectClient::new());
        let drive = Drive::new(options, Arc::clone(&client) as Arc<dyn ObjectClient>)
            .expect("drive assembly");
        drive.connect().await.expect("connect");
        // let the initial root listing settle before tests seed objects
        tokio::time::sleep(Duration::from_millis(20)).await;
        TestMount {
            drive,
            client,
            _scratch: scratch,
        }
    }

    /// Poll `predicate` until it holds or `timeout` elapses.
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn() -> bool,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        predicate()
    }
}

/// Deterministic content for seeded objects: a repeating byte ramp.
pub fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mount_connects() {
        let mount = TestMount::new().await;
        assert!(mount.drive.is_connected());
        assert_eq!(mount.client.counts().head_bucket, 1);
    }

    #[test]
    fn test_pattern_bytes_deterministic() {
        assert_eq!(pattern_bytes(4), vec![0, 1, 2, 3]);
        assert_eq!(pattern_bytes(300)[251], 0);
    }
}

use std::sync::{Arc, Mutex, OnceLock};

use qsfs_client::object_client::ObjectClient;
use qsfs_client::ClientError;

use crate::drive::Drive;
use crate::error::{DriveError, DriveResult};
use crate::options::Options;

static DRIVE: OnceLock<Mutex<Option<Arc<Drive>>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<Arc<Drive>>> {
    DRIVE.get_or_init(|| Mutex::new(None))
}

/// One-shot process-wide initialization for the FUSE adapter. Tests
/// construct drives directly through [`Drive::new`] instead.
pub fn init(options: Options, client: Arc<dyn ObjectClient>) -> DriveResult<Arc<Drive>> {
    let mut guard = slot().lock().unwrap();
    if guard.is_some() {
        return Err(DriveError::Client(ClientError::InvalidArgument {
            context: "drive already initialized".to_string(),
        }));
    }
    let drive = Drive::new(options, client)?;
    *guard = Some(Arc::clone(&drive));
    Ok(drive)
}

/// The process-wide drive, once initialized.
pub fn instance() -> Option<Arc<Drive>> {
    slot().lock().unwrap().clone()
}

/// Tear the process-wide drive down, aborting outstanding multipart
/// uploads and removing the scratch directory.
pub async fn teardown() {
    let drive = slot().lock().unwrap().take();
    if let Some(drive) = drive {
        drive.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qsfs_client::MockObjectClient;

    #[tokio::test]
    async fn test_init_instance_teardown_cycle() {
        assert!(instance().is_none());
        let dir = tempfile::tempdir().unwrap();
        let options = Options {
            bucket: "bucket".to_string(),
            cache_temporary_directory: dir.path().join("scratch"),
            ..Options::default()
        };
        let client = Arc::new(MockObjectClient::new()) as Arc<dyn ObjectClient>;

        let drive = init(options.clone(), Arc::clone(&client)).unwrap();
        assert!(instance().is_some());
        assert!(Arc::ptr_eq(&drive, &instance().unwrap()));

        // a second init is refused while the first is live
        assert!(init(options, client).is_err());

        teardown().await;
        assert!(instance().is_none());
    }
}

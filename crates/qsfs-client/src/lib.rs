#![warn(missing_docs)]

//! QSFS client subsystem: the object store contract, retry policy,
//! priority task pool, and the transfer engine moving bytes between the
//! page cache and the store.

/// Client error taxonomy and errno mapping.
pub mod error;
/// Two-level priority task pool.
pub mod executor;
/// In-memory object store used by tests.
pub mod mock;
/// The capability contract the core consumes from the object store.
pub mod object_client;
/// Retry decision and exponential backoff calculation.
pub mod retry;
/// Lifecycle of one transfer: parts, bytes, state machine.
pub mod transfer;
/// Ranged download and single/multipart upload engine.
pub mod transfer_manager;

pub use error::{ClientError, ClientResult};
pub use executor::{Executor, ExecutorConfig, Priority, TaskFuture};
pub use mock::MockObjectClient;
pub use object_client::{ObjectClient, StatOutcome, StorageStats, UploadedPart};
pub use retry::RetryPolicy;
pub use transfer::{Part, PartState, TransferDirection, TransferHandle, TransferStatus};
pub use transfer_manager::{DownloadSink, TransferConfig, TransferManager, UploadSource};

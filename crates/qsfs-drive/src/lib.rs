#![warn(missing_docs)]

//! QSFS drive subsystem: the POSIX-flavored façade the FUSE adapter
//! talks to, wiring the directory tree, page cache and transfer engine
//! over an object store client.

/// The drive façade: POSIX-like operations over tree + cache + transfers.
pub mod drive;
/// Drive-level errors and errno mapping.
pub mod error;
/// Process-wide one-shot drive initialization and teardown.
pub mod instance;
/// Tracing subscriber setup.
pub mod logging;
/// Mount options and derived component configuration.
pub mod options;
/// Range-keyed single-flight gate for concurrent identical downloads.
pub mod single_flight;

pub use drive::Drive;
pub use error::{DriveError, DriveResult};
pub use logging::{init_logging, LogSink, LoggingConfig};
pub use options::Options;

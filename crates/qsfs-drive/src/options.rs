use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use qsfs_client::executor::ExecutorConfig;
use qsfs_client::{RetryPolicy, TransferConfig};
use qsfs_data::meta_manager::MetaManagerConfig;
use qsfs_data::CacheConfig;

const MB: u64 = 1024 * 1024;

/// Mount options recognized by the drive, with the effect of each
/// documented on its field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Bucket backing the mount.
    pub bucket: String,
    /// Byte budget for the page cache; reads and writes larger than
    /// this are rejected outright.
    pub max_file_cache_bytes: u64,
    /// Pages larger than this spill to scratch files.
    pub page_spill_threshold: u64,
    /// Cap on resident metadata records.
    pub max_stat_count: usize,
    /// Upper bound on concurrent transfer tasks.
    pub max_parallel_transfers: usize,
    /// Part size for multipart upload and ranged-GET tiling.
    pub transfer_buf_max_size: u64,
    /// Uploads above this size go multipart.
    pub multipart_threshold: u64,
    /// Smallest part the store accepts.
    pub min_part_size: u64,
    /// Retries after the initial attempt of a transient failure.
    pub max_retries: u32,
    /// Backoff unit in milliseconds; retry n sleeps `2^n` units.
    pub retry_scale_ms: u64,
    /// Scratch root for spilled pages; removed at teardown.
    pub cache_temporary_directory: PathBuf,
    /// Workers in the client operations pool.
    pub client_pool_size: usize,
    /// Mode bits of the root directory.
    pub root_mode: u32,
    /// Mode bits for directories created without an explicit mode.
    pub define_dir_mode: u32,
    /// Mode bits for files created without an explicit mode.
    pub define_file_mode: u32,
    /// Owner uid reported for entries the store carries no owner for.
    pub uid: u32,
    /// Owner gid reported for entries the store carries no owner for.
    pub gid: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            max_file_cache_bytes: 100 * MB,
            page_spill_threshold: 16 * MB,
            max_stat_count: 10_000,
            max_parallel_transfers: 5,
            transfer_buf_max_size: 10 * MB,
            multipart_threshold: 20 * MB,
            min_part_size: 4 * MB,
            max_retries: 3,
            retry_scale_ms: 25,
            cache_temporary_directory: std::env::temp_dir().join("qsfs_cache"),
            client_pool_size: 5,
            root_mode: 0o777,
            define_dir_mode: 0o755,
            define_file_mode: 0o644,
            uid: 0,
            gid: 0,
        }
    }
}

impl Options {
    /// Reject configurations the transfer engine cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.bucket.is_empty() {
            return Err("bucket name must not be empty".to_string());
        }
        if self.max_file_cache_bytes == 0 {
            return Err("max_file_cache_bytes must be positive".to_string());
        }
        if self.max_parallel_transfers == 0 {
            return Err("max_parallel_transfers must be positive".to_string());
        }
        // the last-two-part averaging needs room for two minimum parts
        if self.transfer_buf_max_size < 2 * self.min_part_size {
            return Err(format!(
                "transfer_buf_max_size ({}) must be at least twice min_part_size ({})",
                self.transfer_buf_max_size, self.min_part_size
            ));
        }
        if self.multipart_threshold < self.min_part_size {
            return Err(format!(
                "multipart_threshold ({}) must be at least min_part_size ({})",
                self.multipart_threshold, self.min_part_size
            ));
        }
        Ok(())
    }

    /// Page cache configuration slice.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_cache_bytes: self.max_file_cache_bytes,
            page_spill_threshold: self.page_spill_threshold,
            scratch_directory: self.cache_temporary_directory.clone(),
        }
    }

    /// Metadata registry configuration slice.
    pub fn meta_manager_config(&self) -> MetaManagerConfig {
        MetaManagerConfig {
            max_count: self.max_stat_count,
        }
    }

    /// Transfer engine configuration slice.
    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            buf_max_size: self.transfer_buf_max_size,
            multipart_threshold: self.multipart_threshold,
            min_part_size: self.min_part_size,
            max_parallel_transfers: self.max_parallel_transfers,
        }
    }

    /// Retry policy derived from the raw option numbers.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_scale_ms))
    }

    /// Client operations pool size.
    pub fn client_executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            workers: self.client_pool_size,
        }
    }

    /// Transfer pool size.
    pub fn transfer_executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            workers: self.max_parallel_transfers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Options {
        Options {
            bucket: "test-bucket".to_string(),
            ..Options::default()
        }
    }

    #[test]
    fn test_defaults_are_valid_given_a_bucket() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_empty_bucket_rejected() {
        assert!(Options::default().validate().is_err());
    }

    #[test]
    fn test_buffer_must_hold_two_minimum_parts() {
        let options = Options {
            transfer_buf_max_size: 4 * MB,
            min_part_size: 4 * MB,
            ..valid()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let options = Options {
            max_parallel_transfers: 0,
            ..valid()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_config_slices_carry_option_values() {
        let options = valid();
        assert_eq!(options.cache_config().max_cache_bytes, 100 * MB);
        assert_eq!(options.meta_manager_config().max_count, 10_000);
        assert_eq!(options.transfer_config().buf_max_size, 10 * MB);
        assert_eq!(options.retry_policy().max_retries, 3);
        assert_eq!(options.client_executor_config().workers, 5);
    }

    #[test]
    fn test_options_roundtrip_through_json() {
        let options = valid();
        let json = serde_json::to_string(&options).unwrap();
        let back: Options = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bucket, options.bucket);
        assert_eq!(back.max_file_cache_bytes, options.max_file_cache_bytes);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let back: Options = serde_json::from_str(r#"{"bucket":"b"}"#).unwrap();
        assert_eq!(back.bucket, "b");
        assert_eq!(back.max_retries, 3);
    }
}

//! Service configuration

use lms_common::config as common_config;
use lms_common::Result;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the sync service.
///
/// Resolution order per field: CLI argument, environment variable, TOML
/// config file, compiled default.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub port: u16,
    pub monitor_interval: Duration,
    pub monitor_batch_size: u32,
    pub event_queue_capacity: usize,
}

impl Config {
    pub const DEFAULT_PORT: u16 = 5740;
    /// Matches the default cadence of the drift cron job (15 minutes)
    pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 900;
    pub const DEFAULT_MONITOR_BATCH_SIZE: u32 = 500;
    pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;

    /// Resolve configuration from CLI arguments plus ambient sources
    pub fn resolve(
        db_path_arg: Option<&str>,
        port_arg: Option<u16>,
        monitor_interval_secs_arg: Option<u64>,
    ) -> Result<Self> {
        let db_path = common_config::resolve_db_path(db_path_arg, "LMS_SYNC_DB")?;

        let port = port_arg
            .or_else(|| {
                common_config::config_file_value("port")
                    .and_then(|v| v.as_integer())
                    .map(|p| p as u16)
            })
            .unwrap_or(Self::DEFAULT_PORT);

        let monitor_interval_secs = monitor_interval_secs_arg
            .or_else(|| {
                common_config::config_file_value("monitor_interval_secs")
                    .and_then(|v| v.as_integer())
                    .map(|s| s as u64)
            })
            .unwrap_or(Self::DEFAULT_MONITOR_INTERVAL_SECS);

        let monitor_batch_size = common_config::config_file_value("monitor_batch_size")
            .and_then(|v| v.as_integer())
            .map(|s| s as u32)
            .unwrap_or(Self::DEFAULT_MONITOR_BATCH_SIZE);

        let event_queue_capacity = common_config::config_file_value("event_queue_capacity")
            .and_then(|v| v.as_integer())
            .map(|s| s as usize)
            .unwrap_or(Self::DEFAULT_EVENT_QUEUE_CAPACITY);

        Ok(Self {
            db_path,
            port,
            monitor_interval: Duration::from_secs(monitor_interval_secs),
            monitor_batch_size,
            event_queue_capacity,
        })
    }
}

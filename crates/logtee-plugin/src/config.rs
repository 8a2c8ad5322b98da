// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;

use logtee::driver::DEFAULT_READ_BUFFER;

use crate::error::PluginError;

pub const DEFAULT_SOCKET: &str = "/run/docker/plugins/logtee.sock";

/// Configuration of the plugin process
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Unix socket the runtime connects to
    pub socket: PathBuf,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    /// Bytes buffered in memory for each log read
    pub read_buffer: usize,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(DEFAULT_SOCKET),
            log_level: "info".to_string(),
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }
}

impl PluginConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, PluginError> {
        let socket = env::var("LOGTEE_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SOCKET));
        let log_level = env::var("LOGTEE_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());
        let read_buffer = match env::var("LOGTEE_READ_BUFFER") {
            Ok(val) => val.trim().parse::<usize>().map_err(|_| {
                PluginError::InvalidConfig(format!(
                    "LOGTEE_READ_BUFFER must be a number of bytes, got '{val}'"
                ))
            })?,
            Err(_) => DEFAULT_READ_BUFFER,
        };

        let config = Self {
            socket,
            log_level,
            read_buffer,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.socket.as_os_str().is_empty() {
            return Err(PluginError::InvalidConfig(
                "LOGTEE_SOCKET cannot be empty".to_string(),
            ));
        }

        if self.read_buffer == 0 {
            return Err(PluginError::InvalidConfig(
                "LOGTEE_READ_BUFFER must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(PluginError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

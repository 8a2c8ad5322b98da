// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors that stop the plugin process.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to set up logging: {0}")]
    Tracing(String),

    #[error("Failed to listen on {path}: {source}")]
    Bind {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Built-in backends registered by [`crate::BackendFactory::default`].

use std::path::{Path, PathBuf};

use crate::backend::SessionInfo;
use crate::errors::BackendError;

pub mod json_file;
pub mod local;

/// Option overriding where a file backend writes.
pub const PATH_OPTION: &str = "path";

/// Resolves the output file of a file backend from its options.
///
/// `path` wins; otherwise the runtime's log path plus `extension` is used.
/// Any other option is rejected.
pub(crate) fn output_path(
    backend: &str,
    info: &SessionInfo,
    extension: &str,
) -> Result<PathBuf, BackendError> {
    let mut path = None;
    for (key, value) in &info.config {
        if key != PATH_OPTION {
            return Err(BackendError::UnknownOption {
                backend: backend.to_string(),
                key: key.clone(),
            });
        }
        if value.is_empty() {
            return Err(BackendError::InvalidOption {
                key: key.clone(),
                value: value.clone(),
            });
        }
        path = Some(PathBuf::from(value));
    }

    match path {
        Some(path) => Ok(path),
        None if info.log_path.is_empty() => Err(BackendError::MissingPath(backend.to_string())),
        None => Ok(PathBuf::from(format!("{}.{extension}", info.log_path))),
    }
}

/// Opens `path` for appending, creating it and its directory if needed.
pub(crate) fn open_append(path: &Path) -> Result<tokio::fs::File, BackendError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(tokio::fs::File::from_std(file))
}

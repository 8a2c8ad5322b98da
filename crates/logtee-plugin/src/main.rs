// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::io;
use std::path::Path;

use tokio::net::UnixListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logtee::{BackendFactory, Driver};

mod api;
mod config;
mod error;
mod server;

use config::PluginConfig;
use error::PluginError;

#[tokio::main]
pub async fn main() {
    let config = match PluginConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            let _ = init_tracing("info");
            error!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_tracing(&config.log_level) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    if let Err(e) = run(config).await {
        error!("{e}");
        std::process::exit(1);
    }
}

fn init_tracing(log_level: &str) -> Result<(), PluginError> {
    // hyper logs every connection at debug level
    let env_filter = format!("{log_level},hyper=off");
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).map_err(|e| PluginError::Tracing(e.to_string()))?,
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| PluginError::Tracing(e.to_string()))
}

async fn run(config: PluginConfig) -> Result<(), PluginError> {
    let listener = bind(&config.socket)?;
    let factory = BackendFactory::default();
    info!(
        "logtee plugin listening on {} with backends {:?}",
        config.socket.display(),
        factory.names()
    );
    let driver = Driver::new(factory).with_read_buffer(config.read_buffer);

    let shutdown = CancellationToken::new();
    let mut terminate = signal(SignalKind::terminate())?;
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => debug!("received interrupt"),
            _ = terminate.recv() => debug!("received terminate"),
        }
        signal_token.cancel();
    });

    let served = server::serve(listener, driver.clone(), shutdown).await;

    info!("shutting down");
    driver.shutdown().await;
    if let Err(e) = std::fs::remove_file(&config.socket) {
        debug!("could not remove {}: {}", config.socket.display(), e);
    }
    served
}

fn bind(socket: &Path) -> Result<UnixListener, PluginError> {
    let bind_error = |source: io::Error| PluginError::Bind {
        path: socket.display().to_string(),
        source,
    };

    if let Some(dir) = socket.parent() {
        std::fs::create_dir_all(dir).map_err(bind_error)?;
    }
    // A socket left behind by a previous run would make bind fail.
    match std::fs::remove_file(socket) {
        Ok(()) => debug!("removed stale socket {}", socket.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(bind_error(e)),
    }
    UnixListener::bind(socket).map_err(bind_error)
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, StatusCode};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use logtee::Driver;

use crate::api;
use crate::error::PluginError;

/// Serves the plugin API on `listener` until `shutdown` fires.
///
/// Connections still open at shutdown, such as followed log reads, are
/// aborted.
pub async fn serve(
    listener: UnixListener,
    driver: Driver,
    shutdown: CancellationToken,
) -> Result<(), PluginError> {
    let service = service_fn(move |req: Request<Incoming>| {
        let driver = driver.clone();
        async move {
            let (parts, body) = req.into_parts();
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    debug!("failed to read request body: {e}");
                    return Ok::<_, hyper::Error>(api::empty(StatusCode::BAD_REQUEST));
                }
            };
            Ok(api::handle(&driver, &parts.method, parts.uri.path(), body).await)
        }
    });

    let server = hyper::server::conn::http1::Builder::new();
    let mut joinset = tokio::task::JoinSet::new();

    loop {
        let conn = tokio::select! {
            () = shutdown.cancelled() => break,
            con_res = listener.accept() => match con_res {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("Server error: {e}");
                    return Err(e.into());
                }
                Ok((conn, _)) => conn,
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => match finished {
                Err(e) if e.is_panic() => {
                    error!("Connection handler panicked: {:?}", e);
                    continue;
                },
                Ok(()) | Err(_) => continue,
            },
        };
        let conn = hyper_util::rt::TokioIo::new(conn);
        let server = server.clone();
        let service = service.clone();
        joinset.spawn(async move {
            if let Err(e) = server.serve_connection(conn, service).await {
                debug!("Connection error: {e}");
            }
        });
    }

    debug!("closing {} open connections", joinset.len());
    joinset.shutdown().await;
    Ok(())
}

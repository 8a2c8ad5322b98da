// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! JSON endpoints of the runtime's logging plugin protocol.

use std::collections::HashMap;
use std::io;

use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::{combinators::BoxBody, BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::{header, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

use logtee::{Driver, ReadConfig, SessionInfo};

pub const ACTIVATE_PATH: &str = "/Plugin.Activate";
pub const START_LOGGING_PATH: &str = "/LogDriver.StartLogging";
pub const STOP_LOGGING_PATH: &str = "/LogDriver.StopLogging";
pub const CAPABILITIES_PATH: &str = "/LogDriver.Capabilities";
pub const READ_LOGS_PATH: &str = "/LogDriver.ReadLogs";

const JSON_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1+json";
const STREAM_CONTENT_TYPE: &str = "application/x-json-stream";

/// Seconds since the epoch of `0001-01-01T00:00:00Z`, the zero time the
/// runtime sends for unset bounds.
const ZERO_TIME_UNIX: i64 = -62_135_596_800;

pub type Body = BoxBody<Bytes, io::Error>;

/// Container description sent by the runtime.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Info {
    pub config: Option<HashMap<String, String>>,
    #[serde(rename = "ContainerID")]
    pub container_id: String,
    pub container_name: String,
    pub container_image_name: String,
    pub log_path: String,
}

impl From<Info> for SessionInfo {
    fn from(info: Info) -> Self {
        SessionInfo {
            container_id: info.container_id,
            container_name: info.container_name,
            container_image_name: info.container_image_name,
            log_path: info.log_path,
            config: info.config.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartLoggingRequest {
    file: String,
    #[serde(default)]
    info: Info,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StopLoggingRequest {
    file: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ReadLogsConfig {
    #[serde(with = "time::serde::rfc3339::option")]
    since: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    until: Option<OffsetDateTime>,
    tail: i64,
    follow: bool,
}

impl Default for ReadLogsConfig {
    fn default() -> Self {
        let defaults = ReadConfig::default();
        Self {
            since: defaults.since,
            until: defaults.until,
            tail: defaults.tail,
            follow: defaults.follow,
        }
    }
}

impl From<ReadLogsConfig> for ReadConfig {
    fn from(config: ReadLogsConfig) -> Self {
        ReadConfig {
            since: config.since.filter(|t| !is_zero_time(t)),
            until: config.until.filter(|t| !is_zero_time(t)),
            tail: config.tail,
            follow: config.follow,
        }
    }
}

fn is_zero_time(t: &OffsetDateTime) -> bool {
    t.unix_timestamp() == ZERO_TIME_UNIX && t.nanosecond() == 0
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReadLogsRequest {
    #[serde(default)]
    info: Info,
    #[serde(default)]
    config: ReadLogsConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ErrResponse {
    err: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ActivateResponse {
    implements: [&'static str; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Capabilities {
    read_logs: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CapabilitiesResponse {
    err: String,
    cap: Capabilities,
}

/// Answers one plugin request.
pub async fn handle(driver: &Driver, method: &Method, path: &str, body: Bytes) -> Response<Body> {
    if *method != Method::POST {
        return empty(StatusCode::NOT_FOUND);
    }

    match path {
        ACTIVATE_PATH => json_response(
            StatusCode::OK,
            &ActivateResponse {
                implements: ["LoggingDriver"],
            },
        ),
        START_LOGGING_PATH => match serde_json::from_slice::<StartLoggingRequest>(&body) {
            Ok(request) => {
                debug!(pipe = %request.file, "start logging request");
                let result = driver
                    .start_logging(&request.file, request.info.into())
                    .await;
                err_response(result.err())
            }
            Err(e) => bad_request(path, &e),
        },
        STOP_LOGGING_PATH => match serde_json::from_slice::<StopLoggingRequest>(&body) {
            Ok(request) => {
                debug!(pipe = %request.file, "stop logging request");
                err_response(driver.stop_logging(&request.file).await.err())
            }
            Err(e) => bad_request(path, &e),
        },
        CAPABILITIES_PATH => json_response(
            StatusCode::OK,
            &CapabilitiesResponse {
                err: String::new(),
                cap: Capabilities {
                    read_logs: driver.capabilities().read_logs,
                },
            },
        ),
        READ_LOGS_PATH => match serde_json::from_slice::<ReadLogsRequest>(&body) {
            Ok(request) => {
                let info = SessionInfo::from(request.info);
                match driver.read_logs(&info, request.config.into()).await {
                    Ok(stream) => {
                        let body = StreamBody::new(ReaderStream::new(stream).map_ok(Frame::data));
                        build(
                            StatusCode::OK,
                            STREAM_CONTENT_TYPE,
                            BodyExt::boxed(body),
                        )
                    }
                    Err(e) => {
                        error!(container_id = %info.container_id, "failed to read logs: {}", e);
                        text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                    }
                }
            }
            Err(e) => bad_request(path, &e),
        },
        _ => empty(StatusCode::NOT_FOUND),
    }
}

fn err_response(error: Option<logtee::DriverError>) -> Response<Body> {
    let err = match error {
        Some(e) => {
            error!("{}", e);
            e.to_string()
        }
        None => String::new(),
    };
    json_response(StatusCode::OK, &ErrResponse { err })
}

fn bad_request(path: &str, error: &serde_json::Error) -> Response<Body> {
    debug!("malformed request to {}: {}", path, error);
    text(StatusCode::BAD_REQUEST, format!("malformed request: {error}"))
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(json) => build(status, JSON_CONTENT_TYPE, full(json)),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn text(status: StatusCode, message: String) -> Response<Body> {
    build(status, "text/plain; charset=utf-8", full(message))
}

pub(crate) fn empty(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(full(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn full(data: impl Into<Bytes>) -> Body {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

fn build(status: StatusCode, content_type: &'static str, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(content_type),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use logtee::codec::encode_frame;
    use logtee::{BackendFactory, LogEntryCodec, LogRecord};
    use serde_json::{json, Value};
    use std::path::Path;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::unix::pipe;
    use tokio_util::codec::FramedRead;

    fn driver() -> Driver {
        Driver::new(BackendFactory::default())
    }

    async fn call(driver: &Driver, path: &str, body: Value) -> (StatusCode, Bytes) {
        let response = handle(driver, &Method::POST, path, Bytes::from(body.to_string())).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes)
    }

    async fn call_json(driver: &Driver, path: &str, body: Value) -> Value {
        let (status, bytes) = call(driver, path, body).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice(&bytes).unwrap()
    }

    fn mkfifo(path: &Path) {
        let status = std::process::Command::new("mkfifo")
            .arg(path)
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_activate_and_capabilities() {
        let driver = driver();
        assert_eq!(
            call_json(&driver, ACTIVATE_PATH, json!({})).await,
            json!({"Implements": ["LoggingDriver"]})
        );
        assert_eq!(
            call_json(&driver, CAPABILITIES_PATH, json!({})).await,
            json!({"Err": "", "Cap": {"ReadLogs": true}})
        );
    }

    #[tokio::test]
    async fn test_unknown_path_and_method() {
        let driver = driver();
        let (status, _) = call(&driver, "/LogDriver.Rotate", json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let response = handle(&driver, &Method::GET, ACTIVATE_PATH, Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let driver = driver();
        let response = handle(
            &driver,
            &Method::POST,
            START_LOGGING_PATH,
            Bytes::from_static(b"{not json"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let (status, _) = call(&driver, STOP_LOGGING_PATH, json!({"Pipe": "/x"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_driver_errors_are_reported_in_envelope() {
        let driver = driver();
        let body = call_json(&driver, STOP_LOGGING_PATH, json!({"File": "/nope"})).await;
        assert_eq!(body, json!({"Err": "no logging session for /nope"}));

        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("c1.fifo");
        mkfifo(&fifo);
        let body = call_json(
            &driver,
            START_LOGGING_PATH,
            json!({"File": fifo, "Info": {"ContainerID": "c1", "Config": null}}),
        )
        .await;
        assert!(body["Err"].as_str().unwrap().contains("drivers"));
        assert_eq!(driver.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_read_logs_for_unknown_container_fails() {
        let driver = driver();
        let (status, body) = call(
            &driver,
            READ_LOGS_PATH,
            json!({"Info": {"ContainerID": "ghost"}, "Config": {"Tail": -1}}),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "no logging session for container ghost");
    }

    #[test]
    fn test_zero_times_mean_unset() {
        let request: ReadLogsRequest = serde_json::from_value(json!({
            "Info": {"ContainerID": "c1"},
            "Config": {
                "Since": "0001-01-01T00:00:00Z",
                "Until": "2024-05-01T10:00:00.5Z",
                "Tail": 10,
                "Follow": true
            }
        }))
        .unwrap();

        let config = ReadConfig::from(request.config);
        assert!(config.since.is_none());
        assert_eq!(config.until.unwrap().unix_timestamp(), 1_714_557_600);
        assert_eq!(config.tail, 10);
        assert!(config.follow);

        let request: ReadLogsRequest = serde_json::from_value(json!({"Info": {}})).unwrap();
        assert_eq!(ReadConfig::from(request.config), ReadConfig::default());
    }

    #[tokio::test]
    async fn test_full_session_over_fifo() {
        let driver = driver();
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("c1.fifo");
        mkfifo(&fifo);
        let info = json!({
            "ContainerID": "c1",
            "ContainerName": "/web",
            "LogPath": dir.path().join("c1"),
            "Config": {"drivers": "local", "mode": "blocking"}
        });

        let body = call_json(
            &driver,
            START_LOGGING_PATH,
            json!({"File": fifo, "Info": info}),
        )
        .await;
        assert_eq!(body, json!({"Err": ""}));

        let record = LogRecord::new(
            "hello from the container",
            "stderr",
            OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
        );
        let frame = encode_frame(&record).unwrap();
        let mut sender = pipe::OpenOptions::new().open_sender(&fifo).unwrap();
        sender.write_all(&frame).await.unwrap();

        let local = dir.path().join("c1.local");
        tokio::time::timeout(Duration::from_secs(5), async {
            while std::fs::metadata(&local).map(|m| m.len()).unwrap_or(0) < frame.len() as u64 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let response = handle(
            &driver,
            &Method::POST,
            READ_LOGS_PATH,
            Bytes::from(json!({"Info": info, "Config": {"Tail": -1}}).to_string()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            STREAM_CONTENT_TYPE
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let records: Vec<LogRecord> = FramedRead::new(&bytes[..], LogEntryCodec::default())
            .map(|frame| frame.unwrap())
            .collect()
            .await;
        assert_eq!(records, vec![record]);

        let body = call_json(&driver, STOP_LOGGING_PATH, json!({"File": fifo})).await;
        assert_eq!(body, json!({"Err": ""}));
        assert_eq!(driver.active_sessions().await, 0);
    }
}

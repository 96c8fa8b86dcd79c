//! `visor_faces`: forwards each clean image to a VISOR face-feature backend
//!
//! One TCP connection per image. The request names the image and the feature file
//! the backend should write (`<featdir>/<clean file stem>.bin`); the call succeeds
//! once a complete response frame has been read.
//!
//! Recognized extra parameters:
//!
//! | Key | Meaning |
//! |---|---|
//! | `backend_host`, `backend_port` | backend address (required) |
//! | `func`, `query_id` | passed through to the backend (required) |
//! | `featdir` | directory for feature files (required) |
//! | `detector` | passed through in `extra_params` when present |
//! | `impath_return` | emit [`Event::ImagePathReturned`] after each success |
//! | `read_timeout_secs` | bound on waiting for the response (default: none) |
//! | `framing` | `"terminator"` (default) or `"length_prefixed"` |

use super::PostProcessor;
use super::framing::{self, Framing};
use crate::config::optional_duration_serde;
use crate::error::{Error, Result};
use crate::types::{Event, ImageDescriptor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;

/// Registered module name
pub const VISOR_FACES: &str = "visor_faces";

#[derive(Debug, Deserialize)]
struct VisorSettings {
    backend_host: String,
    backend_port: u16,
    func: String,
    query_id: Value,
    featdir: PathBuf,
    #[serde(default)]
    detector: Option<Value>,
    #[serde(default, alias = "zmq_impath_return_ch")]
    impath_return: Option<Value>,
    #[serde(default, deserialize_with = "optional_duration_serde::deserialize")]
    read_timeout_secs: Option<Duration>,
    #[serde(default)]
    framing: Framing,
}

impl VisorSettings {
    fn from_extra(extra: &Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(extra.clone()))
            .map_err(|e| Error::Callback(format!("invalid {VISOR_FACES} parameters: {e}")))
    }

    fn wants_impath_return(&self) -> bool {
        !matches!(self.impath_return, None | Some(Value::Null) | Some(Value::Bool(false)))
    }
}

#[derive(Debug, Serialize)]
struct BackendRequest<'a> {
    func: &'a str,
    query_id: &'a Value,
    impath: &'a str,
    featpath: String,
    from_dataset: u8,
    extra_params: Map<String, Value>,
}

/// Feature file for an image: the image's stem with a `.bin` extension, under `featdir`
pub fn feature_path(featdir: &Path, clean_fn: &str) -> PathBuf {
    let stem = Path::new(clean_fn)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    featdir.join(format!("{stem}.bin"))
}

/// VISOR face-feature backend client
#[derive(Debug, Default)]
pub struct VisorFaces;

impl VisorFaces {
    /// Create the module
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PostProcessor for VisorFaces {
    fn name(&self) -> &str {
        VISOR_FACES
    }

    async fn process(
        &self,
        descriptor: &ImageDescriptor,
        extra_params: &Map<String, Value>,
        events: Option<&broadcast::Sender<Event>>,
    ) -> Result<()> {
        let settings = VisorSettings::from_extra(extra_params)?;

        let mut backend_extra = Map::new();
        if let Some(detector) = &settings.detector {
            backend_extra.insert("detector".into(), detector.clone());
        }
        let request = BackendRequest {
            func: &settings.func,
            query_id: &settings.query_id,
            impath: &descriptor.clean_fn,
            featpath: feature_path(&settings.featdir, &descriptor.clean_fn)
                .to_string_lossy()
                .into_owned(),
            from_dataset: 0,
            extra_params: backend_extra,
        };
        let body = serde_json::to_vec(&request)?;

        let address = format!("{}:{}", settings.backend_host, settings.backend_port);
        let mut stream = TcpStream::connect(&address).await.map_err(|e| {
            tracing::error!(module = VISOR_FACES, address = %address, error = %e, "connect failed");
            Error::Callback(format!("connect to {address} failed: {e}"))
        })?;

        tracing::info!(
            module = VISOR_FACES,
            impath = %descriptor.clean_fn,
            featpath = %request.featpath,
            "request to backend"
        );

        framing::write_frame(&mut stream, settings.framing, &body)
            .await
            .map_err(|e| Error::Callback(format!("send to {address} failed: {e}")))?;

        let read = framing::read_frame(&mut stream, settings.framing);
        let response = match settings.read_timeout_secs {
            Some(limit) => tokio::time::timeout(limit, read).await.map_err(|_| {
                tracing::error!(module = VISOR_FACES, address = %address, "backend read timed out");
                Error::Timeout(limit)
            })?,
            None => read.await,
        }
        .map_err(|e| Error::Callback(format!("read from {address} failed: {e}")))?;

        check_response(&response)?;

        if settings.wants_impath_return()
            && let Some(events) = events
        {
            // No subscribers is not an error
            let _ = events.send(Event::ImagePathReturned {
                path: PathBuf::from(&descriptor.clean_fn),
            });
        }

        Ok(())
    }
}

/// A JSON response with `"success": false` is a failure; anything else counts as done
fn check_response(response: &[u8]) -> Result<()> {
    let Ok(parsed) = serde_json::from_slice::<Value>(response) else {
        tracing::debug!(module = VISOR_FACES, len = response.len(), "non-JSON backend response");
        return Ok(());
    };
    match parsed.get("success") {
        Some(Value::Bool(false)) => {
            let message = parsed
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("backend reported failure");
            Err(Error::Callback(message.to_string()))
        }
        _ => Ok(()),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn descriptor() -> ImageDescriptor {
        ImageDescriptor {
            source_url: "http://img.test/face.jpg".into(),
            orig_fn: "/data/static/ab12.jpg".into(),
            thumb_fn: "/data/static/ab12-thumb.jpg".into(),
            clean_fn: "/data/static/ab12-clean.jpg".into(),
        }
    }

    fn extra(port: u16) -> Map<String, Value> {
        json!({
            "backend_host": "127.0.0.1",
            "backend_port": port,
            "func": "addPosTrs",
            "query_id": 7,
            "featdir": "/data/feats",
        })
        .as_object()
        .unwrap()
        .clone()
    }

    /// Accept one connection, capture the request, answer with `reply` written in two halves
    async fn fake_backend(reply: &'static [u8]) -> (u16, oneshot::Receiver<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 256];
            while !request.ends_with(b"$$$") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
            }
            let _ = tx.send(request);

            let (head, tail) = reply.split_at(reply.len() / 2);
            socket.write_all(head).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            socket.write_all(tail).await.unwrap();
        });

        (port, rx)
    }

    #[test]
    fn feature_path_uses_clean_stem() {
        assert_eq!(
            feature_path(Path::new("/data/feats"), "/data/static/ab12-clean.jpg"),
            PathBuf::from("/data/feats/ab12-clean.bin")
        );
    }

    #[tokio::test]
    async fn sends_terminated_request_and_reads_response() {
        let (port, request_rx) = fake_backend(br#"{"success": true}$$$"#).await;
        let mut params = extra(port);
        params.insert("detector".into(), json!("mtcnn"));

        VisorFaces::new()
            .process(&descriptor(), &params, None)
            .await
            .unwrap();

        let raw = request_rx.await.unwrap();
        assert!(raw.ends_with(b"$$$"));
        let request: Value = serde_json::from_slice(&raw[..raw.len() - 3]).unwrap();
        assert_eq!(request["func"], "addPosTrs");
        assert_eq!(request["query_id"], 7);
        assert_eq!(request["impath"], "/data/static/ab12-clean.jpg");
        assert_eq!(request["featpath"], "/data/feats/ab12-clean.bin");
        assert_eq!(request["from_dataset"], 0);
        assert_eq!(request["extra_params"], json!({"detector": "mtcnn"}));
    }

    #[tokio::test]
    async fn extra_params_is_empty_without_detector() {
        let (port, request_rx) = fake_backend(b"ok$$$").await;

        VisorFaces::new()
            .process(&descriptor(), &extra(port), None)
            .await
            .unwrap();

        let raw = request_rx.await.unwrap();
        let request: Value = serde_json::from_slice(&raw[..raw.len() - 3]).unwrap();
        assert_eq!(request["extra_params"], json!({}));
    }

    #[tokio::test]
    async fn backend_reported_failure_is_a_callback_error() {
        let (port, _request_rx) =
            fake_backend(br#"{"success": false, "message": "no face found"}$$$"#).await;

        let err = VisorFaces::new()
            .process(&descriptor(), &extra(port), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Callback(msg) if msg == "no face found"));
    }

    #[tokio::test]
    async fn impath_return_emits_event() {
        let (port, _request_rx) = fake_backend(br#"{"success": true}$$$"#).await;
        let mut params = extra(port);
        params.insert("impath_return".into(), json!(true));
        let (events, mut rx) = broadcast::channel(4);

        VisorFaces::new()
            .process(&descriptor(), &params, Some(&events))
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            Event::ImagePathReturned { path } => {
                assert_eq!(path, PathBuf::from("/data/static/ab12-clean.jpg"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_event_without_impath_return() {
        let (port, _request_rx) = fake_backend(br#"{"success": true}$$$"#).await;
        let (events, mut rx) = broadcast::channel(4);

        VisorFaces::new()
            .process(&descriptor(), &extra(port), Some(&events))
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unreachable_backend_fails() {
        // Bind then drop to get a port with nothing listening
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = VisorFaces::new()
            .process(&descriptor(), &extra(port), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Callback(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_required_parameter_fails() {
        let mut params = extra(1);
        params.remove("featdir");

        let err = VisorFaces::new()
            .process(&descriptor(), &params, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Callback(msg) if msg.contains("featdir")));
    }

    #[tokio::test]
    async fn read_timeout_bounds_silent_backend() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let mut params = extra(port);
        params.insert("read_timeout_secs".into(), json!(1));

        let started = std::time::Instant::now();
        let err = VisorFaces::new()
            .process(&descriptor(), &params, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn length_prefixed_framing_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = framing::read_frame(&mut socket, Framing::LengthPrefixed)
                .await
                .unwrap();
            assert!(serde_json::from_slice::<Value>(&request).is_ok());
            framing::write_frame(&mut socket, Framing::LengthPrefixed, br#"{"success":true}"#)
                .await
                .unwrap();
        });

        let mut params = extra(port);
        params.insert("framing".into(), json!("length_prefixed"));

        VisorFaces::new()
            .process(&descriptor(), &params, None)
            .await
            .unwrap();
    }
}

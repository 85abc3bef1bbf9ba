//! Client for the oracle bridge process

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::btp::types::BdAddr;
use crate::common::error::BridgeError;
use crate::common::{Error, Result};
use crate::ipc::transport;

use super::protocol::{BridgeMessage, ClientMessage, OracleCommand};
use super::{Oracle, OracleEvent, WidRequest};

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Response body for one request
#[derive(Debug)]
struct Reply {
    success: bool,
    result: Option<serde_json::Value>,
    error: Option<BridgeError>,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// Oracle reached through the bridge socket
pub struct OracleClient {
    writer: SharedWriter,
    pending: Pending,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader_task: JoinHandle<()>,
}

impl OracleClient {
    /// Connect to the bridge; returns the client and its inbound event stream
    pub async fn connect(
        path: &Path,
        request_timeout: Duration,
        event_capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<OracleEvent>)> {
        let stream = transport::connect(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound
                || e.kind() == std::io::ErrorKind::ConnectionRefused
            {
                Error::OracleNotRunning
            } else {
                Error::OracleConnectionFailed(e)
            }
        })?;

        tracing::info!(socket = %path.display(), "Connected to oracle bridge");
        Ok(Self::from_stream(stream, request_timeout, event_capacity))
    }

    /// Wrap an already connected stream
    pub fn from_stream<S>(
        stream: S,
        request_timeout: Duration,
        event_capacity: usize,
    ) -> (Self, mpsc::Receiver<OracleEvent>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        let writer: SharedWriter = Arc::new(Mutex::new(writer));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::channel(event_capacity.max(1));

        let reader_task = tokio::spawn(read_loop(
            reader,
            writer.clone(),
            pending.clone(),
            event_tx,
        ));

        let client = Self {
            writer,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            reader_task,
        };
        (client, event_rx)
    }

    async fn request(&self, command: OracleCommand) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let name = command.name();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let message = ClientMessage::Request { id, command };
        tracing::debug!(id, command = name, "Oracle >>> request");
        if let Err(e) = write_message(&self.writer, &message).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let reply = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(Error::OracleCommunication(
                    "Bridge closed the connection".to_string(),
                ))
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(Error::OracleCommunication(format!(
                    "No response to '{}' within {} seconds",
                    name,
                    self.request_timeout.as_secs()
                )));
            }
        };

        if reply.success {
            Ok(reply.result.unwrap_or(serde_json::Value::Null))
        } else {
            let error = reply.error.unwrap_or_else(|| BridgeError {
                code: "UNKNOWN".to_string(),
                message: "Unknown error".to_string(),
            });
            Err(Error::oracle_request_failed(name, &error.message))
        }
    }
}

impl Drop for OracleClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn write_message(writer: &SharedWriter, message: &ClientMessage) -> Result<()> {
    let json = serde_json::to_vec(message)?;
    let mut writer = writer.lock().await;
    transport::send_message(&mut *writer, &json)
        .await
        .map_err(|e| Error::OracleCommunication(e.to_string()))
}

async fn read_loop<R>(
    mut reader: R,
    writer: SharedWriter,
    pending: Pending,
    events: mpsc::Sender<OracleEvent>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let data = match transport::recv_message(&mut reader).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Oracle bridge reader stopped: {}", e);
                break;
            }
        };

        let message: BridgeMessage = match serde_json::from_slice(&data) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Ignoring malformed bridge message: {}", e);
                continue;
            }
        };

        match message {
            BridgeMessage::Response {
                id,
                success,
                result,
                error,
            } => {
                tracing::debug!(id, success, "Oracle <<< response");
                match pending.lock().await.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(Reply {
                            success,
                            result,
                            error,
                        });
                    }
                    None => tracing::warn!(id, "Response for unknown request"),
                }
            }
            BridgeMessage::Wid { id, event } => {
                tracing::debug!(id, wid = event.wid, "Oracle <<< WID");
                let query_style = event.style;
                let (request, answer_rx) = WidRequest::new(event);
                if events.send(OracleEvent::Wid(request)).await.is_err() {
                    break;
                }
                tokio::spawn(forward_answer(id, query_style, answer_rx, writer.clone()));
            }
            BridgeMessage::Finished { verdict } => {
                tracing::debug!(%verdict, "Oracle <<< verdict");
                if events.send(OracleEvent::Finished(verdict)).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Write the engine's answer for bridge WID `id` once it is available
async fn forward_answer(
    id: u64,
    query_style: u32,
    answer_rx: oneshot::Receiver<super::WidReply>,
    writer: SharedWriter,
) {
    let message = match answer_rx.await {
        Ok(Ok(answer)) => ClientMessage::WidAnswer {
            id,
            answer: Some(answer.render(query_style)),
            error: None,
        },
        Ok(Err(error)) => ClientMessage::WidAnswer {
            id,
            answer: None,
            error: Some(error),
        },
        Err(_) => ClientMessage::WidAnswer {
            id,
            answer: None,
            error: Some(BridgeError {
                code: "NO_ANSWER".to_string(),
                message: "Scenario ended before the WID was answered".to_string(),
            }),
        },
    };

    if let Err(e) = write_message(&writer, &message).await {
        tracing::warn!(id, "Failed to send WID answer: {}", e);
    }
}

#[async_trait]
impl Oracle for OracleClient {
    async fn set_pixit(&self, profile: &str, name: &str, value: &str) -> Result<()> {
        self.request(OracleCommand::SetPixit {
            profile: profile.to_string(),
            name: name.to_string(),
            value: value.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn get_test_case_names(&self, profile: &str) -> Result<Vec<String>> {
        let result = self
            .request(OracleCommand::GetTestCaseNames {
                profile: profile.to_string(),
            })
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn start_test_case(&self, profile: &str, name: &str) -> Result<()> {
        self.request(OracleCommand::StartTestCase {
            profile: profile.to_string(),
            name: name.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn stop_test_case(&self) -> Result<()> {
        self.request(OracleCommand::StopTestCase).await?;
        Ok(())
    }

    async fn bd_addr(&self) -> Result<BdAddr> {
        let result = self.request(OracleCommand::BdAddr).await?;
        let text = result
            .as_str()
            .ok_or_else(|| Error::OracleCommunication("bd_addr is not a string".to_string()))?;
        text.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::wid::{style, Answer, WidEvent};

    async fn bridge_send<W: AsyncWrite + Unpin>(w: &mut W, value: serde_json::Value) {
        let data = serde_json::to_vec(&value).unwrap();
        transport::send_message(w, &data).await.unwrap();
    }

    async fn bridge_recv<R: AsyncRead + Unpin>(r: &mut R) -> serde_json::Value {
        let data = transport::recv_message(r).await.unwrap();
        serde_json::from_slice(&data).unwrap()
    }

    #[tokio::test]
    async fn test_request_response_by_id() {
        let (ours, bridge) = tokio::io::duplex(4096);
        let (client, _events) = OracleClient::from_stream(ours, Duration::from_secs(1), 4);
        let (mut br, mut bw) = tokio::io::split(bridge);

        let bridge_task = tokio::spawn(async move {
            let request = bridge_recv(&mut br).await;
            assert_eq!(request["command"]["op"], "get_test_case_names");
            bridge_send(
                &mut bw,
                serde_json::json!({
                    "type": "response",
                    "id": request["id"],
                    "success": true,
                    "result": ["L2CAP/LE/CFC/BV-01-C", "L2CAP/LE/CFC/BV-04-C"]
                }),
            )
            .await;
        });

        let names = client.get_test_case_names("L2CAP").await.unwrap();
        assert_eq!(names.len(), 2);
        bridge_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_request_carries_message() {
        let (ours, bridge) = tokio::io::duplex(4096);
        let (client, _events) = OracleClient::from_stream(ours, Duration::from_secs(1), 4);
        let (mut br, mut bw) = tokio::io::split(bridge);

        tokio::spawn(async move {
            let request = bridge_recv(&mut br).await;
            bridge_send(
                &mut bw,
                serde_json::json!({
                    "type": "response",
                    "id": request["id"],
                    "success": false,
                    "error": {"code": "PTS", "message": "no workspace"}
                }),
            )
            .await;
        });

        let err = client.start_test_case("L2CAP", "X").await.unwrap_err();
        assert!(err.to_string().contains("no workspace"));
    }

    #[tokio::test]
    async fn test_wid_is_forwarded_and_answered() {
        let (ours, bridge) = tokio::io::duplex(4096);
        let (_client, mut events) = OracleClient::from_stream(ours, Duration::from_secs(1), 4);
        let (mut br, mut bw) = tokio::io::split(bridge);

        let event = WidEvent::new(78, style::OK_CANCEL1, "Connect");
        bridge_send(
            &mut bw,
            serde_json::json!({"type": "wid", "id": 9, "event": event}),
        )
        .await;

        match events.recv().await {
            Some(OracleEvent::Wid(request)) => {
                assert_eq!(request.event.wid, 78);
                request.respond(Ok(Answer::Confirm(true)));
            }
            other => panic!("unexpected event {:?}", other),
        }

        let answer = bridge_recv(&mut br).await;
        assert_eq!(answer["type"], "wid_answer");
        assert_eq!(answer["id"], 9);
        assert_eq!(answer["answer"], "OK");
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let (ours, _bridge) = tokio::io::duplex(4096);
        let (client, _events) = OracleClient::from_stream(ours, Duration::from_millis(20), 4);
        let err = client.stop_test_case().await.unwrap_err();
        assert!(matches!(err, Error::OracleCommunication(_)));
    }
}

//! BTP client for driving the IUT tester application
//!
//! The IUT connects to a local socket we listen on. A background task reads
//! frames and splits them into command responses and unsolicited events;
//! events are buffered so a command that waits for e.g. "device connected"
//! sees it even if it arrived while another command was in flight.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use interprocess::local_socket::traits::tokio::Listener as ListenerTrait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::common::{Error, Result};
use crate::ipc::transport;

use super::codec::{self, BtpFrame};
use super::types::{BtpCommand, BtpEvent, EventFilter, OP_ERROR};
use super::IutTransport;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Writer plus response queue; holding the lock means owning the single
/// outstanding BTP command slot
struct CommandChannel {
    writer: BoxedWriter,
    responses: mpsc::UnboundedReceiver<BtpFrame>,
}

/// Received events not yet claimed by a waiting command
struct EventQueue {
    rx: mpsc::UnboundedReceiver<BtpEvent>,
    backlog: VecDeque<BtpEvent>,
}

/// BTP client connected to one IUT
pub struct BtpClient {
    channel: Mutex<CommandChannel>,
    events: Mutex<EventQueue>,
    reader_task: JoinHandle<()>,
}

impl BtpClient {
    /// Listen on `path` and wait for the IUT to connect and report ready
    pub async fn accept(path: &Path, timeout: Duration) -> Result<Self> {
        let listener = transport::create_listener(path).await?;
        tracing::info!(socket = %path.display(), "Waiting for IUT to connect");

        let not_connected = || Error::IutNotConnected {
            path: path.display().to_string(),
            secs: timeout.as_secs(),
        };

        let stream = tokio::time::timeout(timeout, listener.accept())
            .await
            .map_err(|_| not_connected())??;

        let client = Self::from_stream(stream);
        client
            .wait_event(EventFilter::IutReady, timeout)
            .await
            .map_err(|e| match e {
                Error::TransportTimeout { .. } => not_connected(),
                other => other,
            })?;
        tracing::info!("IUT ready");

        Ok(client)
    }

    /// Wrap an already connected byte stream
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let reader_task = tokio::spawn(read_loop(reader, response_tx, event_tx));

        Self {
            channel: Mutex::new(CommandChannel {
                writer: Box::new(writer),
                responses: response_rx,
            }),
            events: Mutex::new(EventQueue {
                rx: event_rx,
                backlog: VecDeque::new(),
            }),
            reader_task,
        }
    }
}

impl Drop for BtpClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_loop<R>(
    mut reader: R,
    responses: mpsc::UnboundedSender<BtpFrame>,
    events: mpsc::UnboundedSender<BtpEvent>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        match codec::read_frame(&mut reader).await {
            Ok(frame) if frame.is_event() => {
                let event = BtpEvent::decode(frame.service, frame.opcode, &frame.data);
                tracing::debug!(?event, "BTP <<< event");
                if events.send(event).is_err() {
                    break;
                }
            }
            Ok(frame) => {
                tracing::trace!(
                    service = frame.service,
                    opcode = frame.opcode,
                    len = frame.data.len(),
                    "BTP <<< response"
                );
                if responses.send(frame).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("BTP reader stopped: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl IutTransport for BtpClient {
    async fn command(&self, command: &BtpCommand, timeout: Duration) -> Result<Vec<u8>> {
        let (service, opcode, index, data) = command.encode();
        let mut channel = self.channel.lock().await;

        // A response that arrives after its command timed out must not be
        // taken as the answer to this one
        while let Ok(stale) = channel.responses.try_recv() {
            tracing::warn!(
                service = stale.service,
                opcode = stale.opcode,
                "Discarding late BTP response"
            );
        }

        tracing::debug!(command = command.name(), "BTP >>> command");
        let frame = BtpFrame {
            service,
            opcode,
            index,
            data,
        };
        codec::write_frame(&mut channel.writer, &frame).await?;

        let response = match tokio::time::timeout(timeout, channel.responses.recv()).await {
            Ok(Some(response)) => response,
            Ok(None) => return Err(Error::IutDisconnected),
            Err(_) => {
                return Err(Error::TransportTimeout {
                    command: command.name().to_string(),
                    secs: timeout.as_secs(),
                })
            }
        };

        if response.opcode == OP_ERROR {
            let status = response.data.first().copied().unwrap_or(0);
            return Err(Error::transport(
                command.name(),
                format!("IUT returned status 0x{:02x}", status),
            ));
        }

        if response.service != service || response.opcode != opcode {
            return Err(Error::BtpProtocol(format!(
                "Response {}/{:#04x} does not match command {}",
                response.service,
                response.opcode,
                command.name()
            )));
        }

        Ok(response.data)
    }

    async fn wait_event(&self, filter: EventFilter, timeout: Duration) -> Result<BtpEvent> {
        let mut queue = self.events.lock().await;

        if let Some(pos) = queue.backlog.iter().position(|e| filter.matches(e)) {
            if let Some(event) = queue.backlog.remove(pos) {
                return Ok(event);
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::TransportTimeout {
                    command: filter.to_string(),
                    secs: timeout.as_secs(),
                });
            }

            match tokio::time::timeout(remaining, queue.rx.recv()).await {
                Ok(Some(event)) if filter.matches(&event) => return Ok(event),
                Ok(Some(event)) => queue.backlog.push_back(event),
                Ok(None) => return Err(Error::IutDisconnected),
                Err(_) => {
                    return Err(Error::TransportTimeout {
                        command: filter.to_string(),
                        secs: timeout.as_secs(),
                    })
                }
            }
        }
    }
}

//! Unix domain socket server for local status queries
//!
//! Provides request-response status queries and pushes state events to
//! subscribed clients.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::events::StateEvent;
use crate::state::Snapshot;

use super::protocol::{DaemonStatus, Request, Response, MAX_FRAME};

/// Status socket server
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    shared: Shared,
    shutdown_tx: broadcast::Sender<()>,
}

/// What each client handler needs
#[derive(Clone)]
struct Shared {
    snapshots: watch::Receiver<Snapshot>,
    events: broadcast::Sender<StateEvent>,
    started: Instant,
}

impl Server {
    /// Bind the socket, replacing a stale one
    pub fn bind(
        socket_path: &Path,
        snapshots: watch::Receiver<Snapshot>,
        events: broadcast::Sender<StateEvent>,
    ) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only access
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .context("failed to restrict socket permissions")?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "status socket listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            shared: Shared {
                snapshots,
                events,
                started: Instant::now(),
            },
            shutdown_tx,
        })
    }

    /// Accept clients until the task is dropped
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let shared = self.shared.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = handle_client(stream, shared) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Disconnect clients and remove the socket file
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("status socket closed");
    }
}

/// Serve one client. Requests are read on a separate task so pushed events
/// never interrupt a partially read frame.
async fn handle_client(stream: UnixStream, shared: Shared) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let (request_tx, mut request_rx) = mpsc::channel::<Response>(8);

    let reader_shared = shared.clone();
    let reader_task = tokio::spawn(async move {
        loop {
            let frame = match read_frame(&mut reader).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("client disconnected");
                    break;
                }
                Err(e) => {
                    warn!(%e, "failed to read request");
                    break;
                }
            };

            let response = match serde_json::from_slice::<Request>(&frame) {
                Ok(request) => {
                    debug!(?request, "received request");
                    process_request(request, &reader_shared)
                }
                Err(e) => Response::Error {
                    code: "bad_request".to_string(),
                    message: e.to_string(),
                },
            };
            if request_tx.send(response).await.is_err() {
                break;
            }
        }
    });

    let mut events: Option<broadcast::Receiver<StateEvent>> = None;

    let result = loop {
        tokio::select! {
            response = request_rx.recv() => {
                let Some(response) = response else {
                    break Ok(());
                };
                if response == Response::Subscribed && events.is_none() {
                    debug!("client subscribed to events");
                    events = Some(shared.events.subscribe());
                }
                if let Err(e) = write_frame(&mut writer, &response).await {
                    break Err(e);
                }
            }
            event = next_event(&mut events) => {
                match event {
                    Ok(event) => {
                        if let Err(e) = write_frame(&mut writer, &Response::Event { event }).await {
                            break Err(e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "status client lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        events = None;
                    }
                }
            }
        }
    };

    reader_task.abort();
    result
}

/// Next pushed event, or never if the client is not subscribed
async fn next_event(
    events: &mut Option<broadcast::Receiver<StateEvent>>,
) -> Result<StateEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn process_request(request: Request, shared: &Shared) -> Response {
    match request {
        Request::Ping => Response::Pong,
        Request::GetStatus => {
            let snapshot = *shared.snapshots.borrow();
            Response::Status(DaemonStatus::from_snapshot(
                &snapshot,
                shared.started.elapsed().as_secs(),
            ))
        }
        Request::Subscribe => Response::Subscribed,
    }
}

/// Read one length-prefixed frame; `None` on a clean disconnect
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME {
        anyhow::bail!("frame of {len} bytes exceeds limit");
    }

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

/// Write a length-prefixed JSON message
async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let bytes = serde_json::to_vec(msg)?;
    let len = u32::try_from(bytes.len()).context("message too large")?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StreamMode;

    async fn request(stream: &mut UnixStream, request: &Request) -> Response {
        write_frame(stream, request).await.unwrap();
        receive(stream).await
    }

    async fn receive(stream: &mut UnixStream) -> Response {
        let frame = read_frame(stream).await.unwrap().unwrap();
        serde_json::from_slice(&frame).unwrap()
    }

    fn temp_socket(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("blanc-{}-{name}.sock", std::process::id()))
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let path = temp_socket("status");
        let mut snapshot = Snapshot::default();
        snapshot.routing.mode = StreamMode::Global;
        let (_snapshot_tx, snapshot_rx) = watch::channel(snapshot);
        let (event_tx, _) = broadcast::channel(8);

        let server = std::sync::Arc::new(Server::bind(&path, snapshot_rx, event_tx).unwrap());
        let runner = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };

        let mut client = UnixStream::connect(&path).await.unwrap();
        assert_eq!(request(&mut client, &Request::Ping).await, Response::Pong);

        match request(&mut client, &Request::GetStatus).await {
            Response::Status(status) => assert_eq!(status.mode, StreamMode::Global),
            other => panic!("unexpected response {other:?}"),
        }

        runner.abort();
        server.shutdown().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let path = temp_socket("events");
        let (_snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let (event_tx, _) = broadcast::channel(8);

        let server = std::sync::Arc::new(Server::bind(&path, snapshot_rx, event_tx.clone()).unwrap());
        let runner = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };

        let mut client = UnixStream::connect(&path).await.unwrap();
        assert_eq!(
            request(&mut client, &Request::Subscribe).await,
            Response::Subscribed
        );

        // The subscription is registered before `Subscribed` is written.
        event_tx.send(StateEvent::PeerConnected).unwrap();
        assert_eq!(
            receive(&mut client).await,
            Response::Event {
                event: StateEvent::PeerConnected
            }
        );

        runner.abort();
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_request_gets_error() {
        let path = temp_socket("bad");
        let (_snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let (event_tx, _) = broadcast::channel(8);

        let server = std::sync::Arc::new(Server::bind(&path, snapshot_rx, event_tx).unwrap());
        let runner = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };

        let mut client = UnixStream::connect(&path).await.unwrap();
        write_frame(&mut client, &serde_json::json!({ "type": "set_mode" }))
            .await
            .unwrap();
        assert!(matches!(receive(&mut client).await, Response::Error { .. }));

        runner.abort();
        server.shutdown().await;
    }
}

//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications of
//! engine events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::events::SwitchEvent;
use crate::hotkey::{HotkeyError, HotkeyListener};

use super::protocol::{DaemonStatus, Notification, Request, Response, SessionStatus};

/// Largest accepted frame body
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

/// State and handles every client handler needs
struct Shared {
    state: RwLock<ServerState>,
    hotkeys: Arc<HotkeyListener>,
    event_tx: broadcast::Sender<SwitchEvent>,
}

/// Derived view of the engine, built from its events
struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
    current_index: Option<usize>,
}

impl ServerState {
    fn new(trigger_key_code: u16) -> Self {
        Self {
            status: DaemonStatus::new(trigger_key_code),
            start_time: std::time::Instant::now(),
            current_index: None,
        }
    }

    /// Fold one engine event into the status snapshot
    fn apply(&mut self, event: &SwitchEvent) {
        let status = &mut self.status;
        match event {
            SwitchEvent::SourcesDiscovered { names, current } => {
                status.sources = names.clone();
                status.current_source = current.and_then(|i| names.get(i).cloned());
                self.current_index = *current;
            }
            SwitchEvent::SourceChanged { name, index, .. } => {
                status.current_source = Some(name.clone());
                status.switch_count += 1;
                self.current_index = Some(*index);
            }
            SwitchEvent::SwitchFailed { .. } => {
                status.failed_switch_count += 1;
            }
            SwitchEvent::SessionArmed => {
                status.session = SessionStatus::Armed;
            }
            SwitchEvent::SessionRearmed { .. } => {
                status.session = SessionStatus::Armed;
                status.rearm_count += 1;
            }
            SwitchEvent::SessionStopped => {
                status.session = SessionStatus::Stopped;
            }
        }
    }
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        hotkeys: Arc<HotkeyListener>,
        event_tx: broadcast::Sender<SwitchEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path)
            .context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .context("failed to restrict socket permissions")?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let shared = Arc::new(Shared {
            state: RwLock::new(ServerState::new(hotkeys.trigger().code())),
            hotkeys,
            event_tx,
        });

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            shared,
            shutdown_tx,
        })
    }

    /// Update the status snapshot from an engine event
    pub async fn record(&self, event: &SwitchEvent) {
        self.shared.state.write().await.apply(event);
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref()
            .context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let shared = Arc::clone(&self.shared);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, shared) => {
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

    /// Handle a single client connection.
    ///
    /// Responses and notifications share one outgoing queue so frames never
    /// interleave on the socket.
    async fn handle_client(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(32);

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = writer.write_all(&frame).await {
                    debug!(?e, "client write failed");
                    break;
                }
            }
        });

        let mut forwarder = None;
        let result = async {
            while let Some(request) = read_frame(&mut reader).await? {
                debug!(?request, "received request");

                let subscribe = matches!(request, Request::Subscribe);
                let events = (subscribe && forwarder.is_none())
                    .then(|| shared.event_tx.subscribe());

                let response = Self::process_request(request, &shared).await;
                if out_tx.send(encode_frame(&response)?).await.is_err() {
                    break;
                }

                if let Some(events) = events {
                    debug!("client subscribed to notifications");
                    forwarder = Some(tokio::spawn(forward_events(events, out_tx.clone())));
                }
            }
            debug!("client disconnected");
            Ok::<(), anyhow::Error>(())
        }
        .await;

        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        drop(out_tx);
        let _ = writer_task.await;

        result
    }

    /// Process a request and return a response
    async fn process_request(request: Request, shared: &Shared) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let mut state = shared.state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                Response::Status(state.status.clone())
            }

            Request::ListSources => {
                let state = shared.state.read().await;
                Response::Sources {
                    names: state.status.sources.clone(),
                    current: state.current_index,
                }
            }

            Request::Cycle => match shared.hotkeys.cycle().await {
                Ok(source) => {
                    info!(name = %source.name, "input source switched via IPC");
                    Response::Switched { name: source.name }
                }
                Err(e) => error_response(&e),
            },

            Request::Rediscover => match shared.hotkeys.rediscover().await {
                Ok(count) => Response::Rediscovered { count },
                Err(e) => error_response(&e),
            },

            Request::Start => match shared.hotkeys.start().await {
                Ok(()) => Response::Started,
                Err(e) => error_response(&e),
            },

            Request::Subscribe => Response::Subscribed,
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

fn error_response(e: &HotkeyError) -> Response {
    Response::Error {
        code: e.code().to_string(),
        message: e.to_string(),
    }
}

/// Push engine events to one subscribed client until it goes away
async fn forward_events(
    mut events: broadcast::Receiver<SwitchEvent>,
    out_tx: mpsc::Sender<Vec<u8>>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let frame = match encode_frame(&Notification::Event { event }) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(?e, "failed to encode notification");
                        continue;
                    }
                };
                if out_tx.send(frame).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "notification subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Read one length-prefixed request; `None` on clean disconnect or an
/// oversized frame
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Request>> {
    // Read message length (4-byte little-endian)
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        warn!(len, "message too large, disconnecting");
        return Ok(None);
    }

    // Read message body
    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;

    let request = serde_json::from_slice(&msg_buf)
        .context("failed to parse request")?;
    Ok(Some(request))
}

/// Encode a length-prefixed JSON message
fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let msg_bytes = serde_json::to_vec(msg)?;
    let mut frame = Vec::with_capacity(4 + msg_bytes.len());
    frame.extend_from_slice(&(msg_bytes.len() as u32).to_le_bytes());
    frame.extend_from_slice(&msg_bytes);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::TriggerKey;
    use crate::state::DisableReason;

    fn create_shared() -> Shared {
        let (event_tx, _) = broadcast::channel(16);
        let hotkeys = Arc::new(HotkeyListener::new(TriggerKey::default(), event_tx.clone()));
        Shared {
            state: RwLock::new(ServerState::new(hotkeys.trigger().code())),
            hotkeys,
            event_tx,
        }
    }

    #[test]
    fn test_state_tracks_discovery_and_switches() {
        let mut state = ServerState::new(179);
        state.apply(&SwitchEvent::SourcesDiscovered {
            names: vec!["U.S.".to_string(), "German".to_string()],
            current: Some(0),
        });
        assert_eq!(state.status.current_source.as_deref(), Some("U.S."));

        state.apply(&SwitchEvent::SourceChanged {
            id: "com.apple.keylayout.German".to_string(),
            name: "German".to_string(),
            index: 1,
            attempts: 1,
        });
        state.apply(&SwitchEvent::SwitchFailed { attempts: 2 });

        assert_eq!(state.status.current_source.as_deref(), Some("German"));
        assert_eq!(state.current_index, Some(1));
        assert_eq!(state.status.switch_count, 1);
        assert_eq!(state.status.failed_switch_count, 1);
    }

    #[test]
    fn test_state_tracks_session() {
        let mut state = ServerState::new(179);
        assert_eq!(state.status.session, SessionStatus::Unarmed);

        state.apply(&SwitchEvent::SessionArmed);
        state.apply(&SwitchEvent::SessionRearmed { reason: DisableReason::Timeout });
        assert_eq!(state.status.session, SessionStatus::Armed);
        assert_eq!(state.status.rearm_count, 1);

        state.apply(&SwitchEvent::SessionStopped);
        assert_eq!(state.status.session, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_process_ping_and_status() {
        let shared = create_shared();
        assert!(matches!(
            Server::process_request(Request::Ping, &shared).await,
            Response::Pong
        ));

        match Server::process_request(Request::GetStatus, &shared).await {
            Response::Status(status) => {
                assert_eq!(status.trigger_key_code, 179);
                assert_eq!(status.session, SessionStatus::Unarmed);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cycle_without_listener_reports_error() {
        let shared = create_shared();
        match Server::process_request(Request::Cycle, &shared).await {
            Response::Error { code, .. } => assert_eq!(code, "unavailable"),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_frame_roundtrip_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let frame = encode_frame(&Request::ListSources).unwrap();
        client.write_all(&frame).await.unwrap();
        drop(client);

        let request = read_frame(&mut server).await.unwrap();
        assert!(matches!(request, Some(Request::ListSources)));
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let frame = encode_frame(&Request::Subscribe).unwrap();
        let (head, body) = frame.split_at(2);
        let mut reader = tokio_test::io::Builder::new().read(head).read(body).build();

        let request = read_frame(&mut reader).await.unwrap();
        assert!(matches!(request, Some(Request::Subscribe)));
    }

    #[tokio::test]
    async fn test_oversized_frame_disconnects() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&((MAX_FRAME_LEN as u32) + 1).to_le_bytes())
            .await
            .unwrap();

        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    /// Bind a server on a throwaway socket and run it in the background
    async fn spawn_server(
        name: &str,
    ) -> (Arc<Server>, tokio::task::JoinHandle<()>, broadcast::Sender<SwitchEvent>, PathBuf) {
        let socket_path = std::env::temp_dir()
            .join(format!("globe-switch-{}-{name}.sock", std::process::id()));
        let (event_tx, _) = broadcast::channel(16);
        let hotkeys = Arc::new(HotkeyListener::new(TriggerKey::default(), event_tx.clone()));
        let server = Arc::new(Server::new(&socket_path, hotkeys, event_tx.clone()).unwrap());

        let running = Arc::clone(&server);
        let task = tokio::spawn(async move {
            let _ = running.run().await;
        });
        (server, task, event_tx, socket_path)
    }

    async fn send_request(stream: &mut UnixStream, request: &Request) {
        stream.write_all(&encode_frame(request).unwrap()).await.unwrap();
    }

    async fn read_json(stream: &mut UnixStream) -> serde_json::Value {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn wait_for_receivers(event_tx: &broadcast::Sender<SwitchEvent>, count: usize) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while event_tx.receiver_count() != count {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_subscriber_receives_source_changed() {
        let (server, task, event_tx, socket_path) = spawn_server("push").await;
        let mut client = UnixStream::connect(&socket_path).await.unwrap();

        send_request(&mut client, &Request::Subscribe).await;
        assert_eq!(read_json(&mut client).await, serde_json::json!({"type": "subscribed"}));

        event_tx
            .send(SwitchEvent::SourceChanged {
                id: "b".to_string(),
                name: "B".to_string(),
                index: 1,
                attempts: 1,
            })
            .unwrap();

        let pushed = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            read_json(&mut client),
        )
        .await
        .unwrap();
        assert_eq!(
            pushed,
            serde_json::json!({
                "type": "event",
                "event": {
                    "type": "source_changed",
                    "id": "b",
                    "name": "B",
                    "index": 1,
                    "attempts": 1
                }
            })
        );

        // Requests keep working on a subscribed connection
        send_request(&mut client, &Request::Ping).await;
        assert_eq!(read_json(&mut client).await, serde_json::json!({"type": "pong"}));

        server.shutdown().await;
        task.abort();
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_subscriber_disconnect_releases_forwarder() {
        let (server, task, event_tx, socket_path) = spawn_server("drop").await;

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        send_request(&mut client, &Request::Subscribe).await;
        assert_eq!(read_json(&mut client).await, serde_json::json!({"type": "subscribed"}));
        assert_eq!(event_tx.receiver_count(), 1);

        drop(client);
        wait_for_receivers(&event_tx, 0).await;

        // Publishing with no subscribers left is harmless, and the server
        // keeps accepting clients
        assert!(event_tx.send(SwitchEvent::SessionArmed).is_err());
        let mut other = UnixStream::connect(&socket_path).await.unwrap();
        send_request(&mut other, &Request::Ping).await;
        assert_eq!(read_json(&mut other).await, serde_json::json!({"type": "pong"}));

        server.shutdown().await;
        task.abort();
    }
}

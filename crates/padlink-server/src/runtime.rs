//! Broker runtime shell.
//!
//! Accepts connections, reads frames, and drives a [`Broker`] state
//! machine: every connection event goes through the broker's lock, and the
//! returned actions are executed afterwards (frame sends, connection
//! drops, verifier spawns). One task per connection, one writer task per
//! connection for ordered outbound frames.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use padlink_proto::{Frame, FrameCutter};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    sync::{Notify, mpsc},
};
use tokio_rustls::TlsAcceptor;

use crate::{
    driver::{Broker, SessionAction, SessionEvent},
    error::ServerError,
};

/// Depth of each connection's outbound frame channel.
const WRITE_QUEUE_DEPTH: usize = 64;

/// Runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Optional TLS; plain TCP when absent.
    pub tls: Option<crate::transport::TlsSettings>,
    /// External certificate verifier executable.
    pub verifier: Option<PathBuf>,
    /// Log every frame at debug level.
    pub dump_packets: bool,
}

struct ConnEntry {
    writer: mpsc::Sender<Frame>,
    closer: Arc<Notify>,
}

struct Shared<B> {
    driver: tokio::sync::Mutex<B>,
    connections: Mutex<HashMap<u64, ConnEntry>>,
    verifier: Option<PathBuf>,
    dump_packets: bool,
}

impl<B> Shared<B> {
    fn entry(&self, session_id: u64) -> Option<(mpsc::Sender<Frame>, Arc<Notify>)> {
        let connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        connections.get(&session_id).map(|e| (e.writer.clone(), Arc::clone(&e.closer)))
    }
}

/// A bound broker server.
pub struct Server<B: Broker> {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    shared: Arc<Shared<B>>,
}

impl<B: Broker> Server<B> {
    /// Bind a listener and wrap the broker.
    pub async fn bind(
        bind: &str,
        broker: B,
        config: RuntimeConfig,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|e| ServerError::Transport(format!("failed to bind {bind}: {e}")))?;
        let tls = match &config.tls {
            Some(settings) => Some(crate::transport::load_tls_acceptor(settings)?),
            None => None,
        };
        tracing::info!("listening on {bind}");
        Ok(Self {
            listener,
            tls,
            shared: Arc::new(Shared {
                driver: tokio::sync::Mutex::new(broker),
                connections: Mutex::new(HashMap::new()),
                verifier: config.verifier,
                dump_packets: config.dump_packets,
            }),
        })
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("accept error: {e}");
                    continue;
                },
            };
            tracing::debug!(%peer, "connection accepted");
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("set_nodelay failed: {e}");
            }

            let shared = Arc::clone(&self.shared);
            match self.tls.clone() {
                Some(acceptor) => {
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls_stream) => handle_connection(tls_stream, shared).await,
                            Err(e) => tracing::warn!(%peer, "TLS handshake failed: {e}"),
                        }
                    });
                },
                None => {
                    tokio::spawn(handle_connection(stream, shared));
                },
            }
        }
    }
}

async fn handle_connection<S, B>(stream: S, shared: Arc<Shared<B>>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    B: Broker,
{
    let session_id = rand::random::<u64>();
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let (writer_tx, mut writer_rx) = mpsc::channel::<Frame>(WRITE_QUEUE_DEPTH);
    let closer = Arc::new(Notify::new());

    {
        let mut connections = shared.connections.lock().unwrap_or_else(PoisonError::into_inner);
        connections
            .insert(session_id, ConnEntry { writer: writer_tx, closer: Arc::clone(&closer) });
    }

    let dump_packets = shared.dump_packets;
    tokio::spawn(async move {
        while let Some(frame) = writer_rx.recv().await {
            if dump_packets {
                tracing::debug!(session_id, ?frame, "send");
            }
            let bytes = match frame.to_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("dropping unencodable frame: {e}");
                    continue;
                },
            };
            if let Err(e) = write_half.write_all(&bytes).await {
                tracing::debug!(session_id, "write failed: {e}");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    process_event(&shared, SessionEvent::Accepted { session_id }).await;

    let mut cutter = FrameCutter::new();
    'conn: loop {
        tokio::select! {
            () = closer.notified() => break,
            read = read_half.read_buf(cutter.buffer_mut()) => match read {
                Ok(0) => break,
                Ok(_) => {},
                Err(e) => {
                    tracing::debug!(session_id, "read failed: {e}");
                    break;
                },
            },
        }
        loop {
            match cutter.next_frame() {
                Ok(Some(frame)) => {
                    if shared.dump_packets {
                        tracing::debug!(session_id, ?frame, "recv");
                    }
                    process_event(&shared, SessionEvent::FrameReceived { session_id, frame })
                        .await;
                },
                Ok(None) => break,
                Err(e) => {
                    // framing errors are fatal for the connection
                    tracing::warn!(session_id, "framing error, dropping connection: {e}");
                    break 'conn;
                },
            }
        }
    }

    process_event(&shared, SessionEvent::Closed { session_id }).await;
    let mut connections = shared.connections.lock().unwrap_or_else(PoisonError::into_inner);
    connections.remove(&session_id);
}

/// Run one event through the broker lock and execute the actions.
async fn process_event<B: Broker>(shared: &Arc<Shared<B>>, event: SessionEvent) {
    let actions = {
        let mut driver = shared.driver.lock().await;
        driver.process_event(event)
    };
    execute_actions(shared, actions).await;
}

async fn execute_actions<B: Broker>(shared: &Arc<Shared<B>>, actions: Vec<SessionAction>) {
    for action in actions {
        match action {
            SessionAction::Send { session_id, frame } => {
                let Some((writer, _)) = shared.entry(session_id) else {
                    tracing::warn!(session_id, "send to unknown session");
                    continue;
                };
                if writer.send(frame).await.is_err() {
                    tracing::debug!(session_id, "send to closed session");
                }
            },
            SessionAction::Close { session_id } => {
                if let Some((_, closer)) = shared.entry(session_id) {
                    tracing::debug!(session_id, "closing connection");
                    closer.notify_one();
                }
            },
            SessionAction::SpawnVerifier { session_id, request_id, content } => {
                spawn_verifier(shared, session_id, request_id, content);
            },
        }
    }
}

fn spawn_verifier<B: Broker>(
    shared: &Arc<Shared<B>>,
    session_id: u64,
    request_id: u32,
    content: String,
) {
    let Some(verifier) = shared.verifier.clone() else {
        // misconfiguration: the driver only asks when a verifier was set
        tracing::warn!("verifier action without configured verifier");
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            process_event(&shared, SessionEvent::VerifierVerdict {
                session_id,
                request_id,
                ok: false,
            })
            .await;
        });
        return;
    };

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let ok = match tokio::process::Command::new(&verifier).arg(&content).status().await {
            Ok(status) => status.success(),
            Err(e) => {
                tracing::warn!("failed to run verifier {}: {e}", verifier.display());
                false
            },
        };
        process_event(&shared, SessionEvent::VerifierVerdict { session_id, request_id, ok })
            .await;
    });
}

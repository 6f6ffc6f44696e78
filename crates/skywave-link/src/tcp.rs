//! TCP link variants: outbound connector and inbound listener.
//!
//! Both the ARDOP modem bridge and wired mesh peers are byte streams
//! reached over TCP; the only differences are direction and whether the
//! link-local password handshake runs. The handshake authenticates the
//! peer for connection admission only — it provides no confidentiality for
//! mesh content.
//!
//! Connection failures trigger exponential reconnection backoff with a
//! configurable cap. Accepted listener connections are not reconnected
//! from this side; the remote connector owns that.

use std::{sync::Arc, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::{mpsc, watch},
};

use crate::{
    LinkError,
    framing::{read_frame, write_frame},
    link::{LinkHandle, LinkHealth, LinkMetrics},
    mux::{InboundFrame, Multiplexer},
};

/// Handshake preamble for password-protected links.
const AUTH_MAGIC: &[u8] = b"SKYWAUTH";
/// Responder's admission acknowledgement.
const AUTH_OK: &[u8] = b"SKYWAUTH-OK";
/// How long a responder waits for the opening auth frame.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for one outbound TCP link.
#[derive(Debug, Clone)]
pub struct TcpLinkConfig {
    /// Link name used in frame tags and logs.
    pub name: String,
    /// `host:port` to connect to.
    pub addr: String,
    /// Link-local password; `None` skips the handshake (modem bridges).
    pub password: Option<String>,
    /// First reconnect delay.
    pub backoff_initial: Duration,
    /// Reconnect delay cap.
    pub backoff_max: Duration,
    /// Outbound queue depth before sends are refused.
    pub outbound_capacity: usize,
}

impl TcpLinkConfig {
    /// Sensible defaults around a name and address.
    #[must_use]
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            password: None,
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            outbound_capacity: 64,
        }
    }
}

fn make_handle(
    name: &str,
    capacity: usize,
) -> (LinkHandle, mpsc::Receiver<Vec<u8>>, watch::Sender<LinkHealth>) {
    let (outbound, outbound_rx) = mpsc::channel(capacity);
    let (health_tx, health_rx) = watch::channel(LinkHealth::Reconnecting);
    let handle = LinkHandle {
        name: name.to_string(),
        outbound,
        health: health_rx,
        metrics: Arc::new(LinkMetrics::default()),
    };
    (handle, outbound_rx, health_tx)
}

/// Spawn an outbound link that connects, handshakes, and reconnects with
/// backoff until shutdown. Returns the handle immediately.
#[must_use]
pub fn spawn_connector(
    config: TcpLinkConfig,
    inbound: mpsc::Sender<InboundFrame>,
    mut shutdown: watch::Receiver<bool>,
) -> LinkHandle {
    let (handle, mut outbound_rx, health_tx) = make_handle(&config.name, config.outbound_capacity);
    let metrics = Arc::clone(&handle.metrics);
    let name = config.name.clone();

    tokio::spawn(async move {
        let mut backoff = config.backoff_initial;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match connect_once(&config).await {
                Ok(stream) => {
                    tracing::info!(link = %name, addr = %config.addr, "link connected");
                    let _ = health_tx.send(LinkHealth::Connected);
                    metrics.note_connection(true);
                    backoff = config.backoff_initial;

                    let reason = run_connection(
                        stream,
                        &name,
                        &mut outbound_rx,
                        &inbound,
                        &metrics,
                        &mut shutdown,
                    )
                    .await;
                    metrics.note_connection(false);

                    if *shutdown.borrow() {
                        break;
                    }
                    tracing::warn!(link = %name, %reason, "link dropped, reconnecting");
                    let _ = health_tx.send(LinkHealth::Reconnecting);
                },
                Err(error) => {
                    tracing::debug!(link = %name, %error, delay = ?backoff, "connect failed");
                },
            }

            tokio::select! {
                () = tokio::time::sleep(backoff) => {},
                _ = shutdown.changed() => {},
            }
            backoff = (backoff * 2).min(config.backoff_max);
        }

        let _ = health_tx.send(LinkHealth::Closed);
        tracing::info!(link = %name, "link closed");
    });

    handle
}

/// Accept loop for inbound mesh peers.
///
/// Each admitted connection becomes a link named after the peer address
/// and is registered with the multiplexer. Runs until shutdown.
///
/// # Errors
///
/// - [`LinkError::Io`] if the listen address cannot be bound
pub async fn run_listener(
    listen: &str,
    password: Option<String>,
    mux: Multiplexer,
    shutdown: watch::Receiver<bool>,
) -> Result<(), LinkError> {
    let listener = TcpListener::bind(listen).await?;
    tracing::info!(addr = %listen, "mesh listener bound");
    let mut shutdown_accept = shutdown.clone();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let password = password.clone();
                let mux = mux.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(error) = serve_peer(stream, &peer.to_string(), password, mux, shutdown).await {
                        tracing::warn!(%peer, %error, "inbound peer rejected");
                    }
                });
            },
            _ = shutdown_accept.changed() => {
                if *shutdown_accept.borrow() {
                    break;
                }
            },
        }
    }
    Ok(())
}

async fn connect_once(config: &TcpLinkConfig) -> Result<TcpStream, LinkError> {
    let mut stream = TcpStream::connect(&config.addr).await?;
    stream.set_nodelay(true)?;

    if let Some(password) = &config.password {
        initiate_handshake(&mut stream, password).await?;
    }
    Ok(stream)
}

async fn serve_peer(
    mut stream: TcpStream,
    peer: &str,
    password: Option<String>,
    mux: Multiplexer,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), LinkError> {
    stream.set_nodelay(true)?;
    if let Some(password) = &password {
        accept_handshake(&mut stream, password).await?;
    }

    let name = format!("tcp-in-{peer}");
    let (handle, mut outbound_rx, health_tx) = make_handle(&name, 64);
    let _ = health_tx.send(LinkHealth::Connected);
    handle.metrics.note_connection(true);
    let metrics = Arc::clone(&handle.metrics);
    mux.add_link(handle);
    tracing::info!(link = %name, "inbound peer admitted");

    let reason = run_connection(
        stream,
        &name,
        &mut outbound_rx,
        &mux.inbound_sender(),
        &metrics,
        &mut shutdown,
    )
    .await;
    metrics.note_connection(false);
    let _ = health_tx.send(LinkHealth::Closed);
    mux.remove_link(&name);
    tracing::info!(link = %name, %reason, "inbound peer gone");
    Ok(())
}

/// Pump one live connection: drain the outbound queue onto the socket and
/// feed received frames into the inbound queue. Returns the drop reason.
///
/// The read and write loops are separate long-lived futures so that
/// completing one select arm never cancels a partially read frame — a
/// mid-frame cancellation would desynchronize the length-prefixed stream.
async fn run_connection<S>(
    stream: S,
    name: &str,
    outbound_rx: &mut mpsc::Receiver<Vec<u8>>,
    inbound: &mpsc::Sender<InboundFrame>,
    metrics: &LinkMetrics,
    shutdown: &mut watch::Receiver<bool>,
) -> String
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let write_loop = async {
        loop {
            let Some(bytes) = outbound_rx.recv().await else {
                return "outbound queue closed".to_string();
            };
            if let Err(error) = write_frame(&mut writer, &bytes).await {
                return format!("write failed: {error}");
            }
            metrics.note_tx(bytes.len());
        }
    };

    let read_loop = async {
        loop {
            match read_frame(&mut reader).await {
                Ok(bytes) => {
                    metrics.note_rx(bytes.len());
                    let frame = InboundFrame { bytes, link: name.to_string() };
                    if inbound.send(frame).await.is_err() {
                        return "inbound queue closed".to_string();
                    }
                },
                Err(error) => return format!("read failed: {error}"),
            }
        }
    };

    tokio::select! {
        reason = write_loop => reason,
        reason = read_loop => reason,
        () = wait_for_shutdown(shutdown) => "shutdown".to_string(),
    }
}

/// Resolve once the shutdown flag flips to true; pend forever if the
/// sender is gone without signalling.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn initiate_handshake(stream: &mut TcpStream, password: &str) -> Result<(), LinkError> {
    let mut auth = Vec::with_capacity(AUTH_MAGIC.len() + password.len());
    auth.extend_from_slice(AUTH_MAGIC);
    auth.extend_from_slice(password.as_bytes());
    write_frame(stream, &auth).await?;

    let reply = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(stream))
        .await
        .map_err(|_| LinkError::HandshakeFailed("timed out waiting for acceptance".into()))??;

    if reply != AUTH_OK {
        return Err(LinkError::HandshakeFailed("peer rejected credentials".into()));
    }
    Ok(())
}

async fn accept_handshake(stream: &mut TcpStream, password: &str) -> Result<(), LinkError> {
    let auth = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(stream))
        .await
        .map_err(|_| LinkError::HandshakeFailed("timed out waiting for credentials".into()))??;

    let valid = auth
        .strip_prefix(AUTH_MAGIC)
        .is_some_and(|supplied| constant_time_eq(supplied, password.as_bytes()));

    if !valid {
        return Err(LinkError::HandshakeFailed("bad credentials".into()));
    }
    write_frame(stream, AUTH_OK).await?;
    Ok(())
}

/// Length-leaking but content-constant comparison; good enough for a
/// link-admission password that also travels the wire in clear.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

//! Pluggable wire transport
//!
//! The DHT core only ever sees the `Connector` trait: deliver opaque bytes
//! to a uri, yield inbound bytes with the uri they arrived from. The
//! reference implementation frames messages as netstrings over TCP; an
//! in-memory hub wires nodes together for tests without sockets.

use crate::error::{DhtError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Largest frame a connector will accept
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Capacity of a connector's inbound queue
const INBOX_CAPACITY: usize = 64;

/// Message delivery between peers
#[async_trait]
pub trait Connector: Send + Sync {
    /// Deliver `data` to the peer at `uri`
    async fn send(&self, uri: &str, data: &[u8]) -> Result<()>;

    /// Next inbound message and the uri it arrived from
    async fn receive(&self) -> Result<(Vec<u8>, String)>;

    /// The uri remote peers should use to reach this connector
    fn local_uri(&self) -> String;
}

/// Encode a netstring frame: `<len>:<data>,`
pub fn encode_netstring(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{}:", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.push(b',');
    out
}

/// Read one netstring frame off an async reader
///
/// Rejects non-digit length prefixes, lengths above `max_len` and a missing
/// trailing comma.
pub async fn read_netstring<R>(reader: &mut R, max_len: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len: usize = 0;
    let mut digits = 0;
    loop {
        let byte = reader
            .read_u8()
            .await
            .map_err(|e| DhtError::Transport(format!("netstring read failed: {}", e)))?;
        match byte {
            b'0'..=b'9' => {
                digits += 1;
                if digits > 9 {
                    return Err(DhtError::Transport("netstring length too long".into()));
                }
                len = len * 10 + (byte - b'0') as usize;
                if len > max_len {
                    return Err(DhtError::Transport(format!(
                        "netstring of {} bytes exceeds limit {}",
                        len, max_len
                    )));
                }
            }
            b':' => {
                if digits == 0 {
                    return Err(DhtError::Transport("netstring missing length".into()));
                }
                break;
            }
            other => {
                return Err(DhtError::Transport(format!(
                    "invalid netstring length byte 0x{:02x}",
                    other
                )));
            }
        }
    }

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| DhtError::Transport(format!("netstring body read failed: {}", e)))?;

    let trailer = reader
        .read_u8()
        .await
        .map_err(|e| DhtError::Transport(format!("netstring trailer read failed: {}", e)))?;
    if trailer != b',' {
        return Err(DhtError::Transport("netstring missing trailing comma".into()));
    }
    Ok(buf)
}

fn parse_netstring_uri(uri: &str) -> Result<SocketAddr> {
    let addr = uri
        .strip_prefix("netstring://")
        .ok_or_else(|| DhtError::Transport(format!("not a netstring uri: {}", uri)))?;
    addr.parse()
        .map_err(|e| DhtError::Transport(format!("bad address in uri {}: {}", uri, e)))
}

/// Netstring-over-TCP connector
///
/// Each outbound message opens a connection, writes one frame and closes;
/// an accept loop feeds inbound frames into the connector's queue.
pub struct NetstringConnector {
    local_uri: String,
    inbox: Mutex<mpsc::Receiver<(Vec<u8>, String)>>,
}

impl NetstringConnector {
    /// Bind a listener and start accepting inbound frames
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DhtError::Transport(format!("bind {} failed: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| DhtError::Transport(e.to_string()))?;

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        tokio::spawn(Self::accept_loop(listener, tx));

        Ok(Self {
            local_uri: format!("netstring://{}", local_addr),
            inbox: Mutex::new(rx),
        })
    }

    async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<(Vec<u8>, String)>) {
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut stream = stream;
                let from = format!("netstring://{}", peer_addr);
                loop {
                    match read_netstring(&mut stream, MAX_FRAME_BYTES).await {
                        Ok(frame) => {
                            if tx.send((frame, from.clone())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(from = %from, error = %e, "connection closed");
                            break;
                        }
                    }
                }
            });
        }
    }
}

#[async_trait]
impl Connector for NetstringConnector {
    async fn send(&self, uri: &str, data: &[u8]) -> Result<()> {
        let addr = parse_netstring_uri(uri)?;
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| DhtError::Transport(format!("connect {} failed: {}", uri, e)))?;
        stream
            .write_all(&encode_netstring(data))
            .await
            .map_err(|e| DhtError::Transport(format!("send to {} failed: {}", uri, e)))?;
        let _ = stream.shutdown().await;
        Ok(())
    }

    async fn receive(&self) -> Result<(Vec<u8>, String)> {
        self.inbox
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| DhtError::Transport("listener closed".into()))
    }

    fn local_uri(&self) -> String {
        self.local_uri.clone()
    }
}

type MemoryRegistry = Arc<StdMutex<HashMap<String, mpsc::Sender<(Vec<u8>, String)>>>>;

fn registry_sender(registry: &MemoryRegistry, uri: &str) -> Result<mpsc::Sender<(Vec<u8>, String)>> {
    let peers = registry
        .lock()
        .map_err(|_| DhtError::Transport("hub lock poisoned".into()))?;
    peers
        .get(uri)
        .cloned()
        .ok_or_else(|| DhtError::Transport(format!("no peer registered at {}", uri)))
}

/// In-process message switchboard for tests
///
/// Registers one queue per uri; `MemoryConnector::send` looks the target up
/// and delivers directly.
#[derive(Default)]
pub struct MemoryHub {
    peers: MemoryRegistry,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a connector under `uri`
    pub fn connector(&self, uri: &str) -> Result<MemoryConnector> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let mut peers = self
            .peers
            .lock()
            .map_err(|_| DhtError::Transport("hub lock poisoned".into()))?;
        peers.insert(uri.to_string(), tx);
        Ok(MemoryConnector {
            peers: Arc::clone(&self.peers),
            local_uri: uri.to_string(),
            inbox: Mutex::new(rx),
        })
    }

    /// Unregister a uri, simulating a vanished peer
    pub fn disconnect(&self, uri: &str) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.remove(uri);
        }
    }
}

/// Loopback connector attached to a [`MemoryHub`]
pub struct MemoryConnector {
    peers: MemoryRegistry,
    local_uri: String,
    inbox: Mutex<mpsc::Receiver<(Vec<u8>, String)>>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn send(&self, uri: &str, data: &[u8]) -> Result<()> {
        let tx = registry_sender(&self.peers, uri)?;
        tx.send((data.to_vec(), self.local_uri.clone()))
            .await
            .map_err(|_| DhtError::Transport(format!("peer at {} hung up", uri)))
    }

    async fn receive(&self) -> Result<(Vec<u8>, String)> {
        self.inbox
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| DhtError::Transport("hub closed".into()))
    }

    fn local_uri(&self) -> String {
        self.local_uri.clone()
    }
}

//! DNS listener lifecycle.
//!
//! The listener owns the UDP and TCP sockets for the configured DNS address
//! and answers every query with REFUSED until a resolver takes over the
//! sockets' role. Reconfiguration only needs the lifecycle: reinit with a
//! new address, start (which can fail on bind), stop.

use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::DnsConfig;
use crate::probe::port::join_host_port;

const RCODE_REFUSED: u8 = 5;
const HEADER_LEN: usize = 12;

pub trait DnsLifecycle: Send + Sync {
    /// Stop any running listener and adopt `config` for the next start
    fn reinit(&self, config: &DnsConfig) -> Result<()>;
    fn start(&self) -> Result<()>;
    fn stop(&self);
}

#[derive(Default)]
struct ListenerState {
    config: Option<DnsConfig>,
    running: Option<CancellationToken>,
}

pub struct DnsListener {
    handle: Handle,
    state: Mutex<ListenerState>,
}

impl DnsListener {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            state: Mutex::new(ListenerState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DnsLifecycle for DnsListener {
    fn reinit(&self, config: &DnsConfig) -> Result<()> {
        let mut state = self.state();
        if let Some(token) = state.running.take() {
            token.cancel();
        }
        state.config = Some(config.clone());
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let mut state = self.state();
        if state.running.is_some() {
            bail!("DNS listener is already running");
        }
        let Some(config) = state.config.clone() else {
            bail!("DNS listener is not initialized");
        };

        let host = if config.bind_host.is_empty() { "0.0.0.0" } else { config.bind_host.as_str() };
        let addr: SocketAddr = join_host_port(host, config.port)
            .parse()
            .with_context(|| format!("Invalid DNS bind address {}", config.bind_host))?;

        let udp = std::net::UdpSocket::bind(addr)
            .with_context(|| format!("Failed to bind udp {}", addr))?;
        let tcp = std::net::TcpListener::bind(addr)
            .with_context(|| format!("Failed to bind tcp {}", addr))?;
        udp.set_nonblocking(true)?;
        tcp.set_nonblocking(true)?;

        // from_std registers with the reactor of the entered runtime
        let _guard = self.handle.enter();
        let udp = UdpSocket::from_std(udp)?;
        let tcp = TcpListener::from_std(tcp)?;

        let token = CancellationToken::new();
        self.handle.spawn(serve_udp(udp, token.clone()));
        self.handle.spawn(serve_tcp(tcp, token.clone()));
        state.running = Some(token);

        tracing::info!("DNS listener started on {}", addr);
        Ok(())
    }

    fn stop(&self) {
        if let Some(token) = self.state().running.take() {
            token.cancel();
            tracing::info!("DNS listener stopped");
        }
    }
}

async fn serve_udp(socket: UdpSocket, cancel: CancellationToken) {
    let mut buf = [0u8; 512];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, src)) => {
                        if let Some(reply) = refused_reply(&buf[..len]) {
                            let _ = socket.send_to(&reply, src).await;
                        }
                    }
                    Err(e) => tracing::debug!("DNS udp receive error: {}", e),
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn serve_tcp(listener: TcpListener, cancel: CancellationToken) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        tokio::spawn(serve_tcp_conn(stream, cancel.child_token()));
                    }
                    Err(e) => tracing::debug!("DNS tcp accept error: {}", e),
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn serve_tcp_conn(mut stream: TcpStream, cancel: CancellationToken) {
    let exchange = async {
        loop {
            let len = stream.read_u16().await? as usize;
            let mut query = vec![0u8; len];
            stream.read_exact(&mut query).await?;

            let Some(reply) = refused_reply(&query) else {
                return Ok::<_, std::io::Error>(());
            };
            stream.write_u16(reply.len() as u16).await?;
            stream.write_all(&reply).await?;
        }
    };

    tokio::select! {
        _ = exchange => {}
        _ = cancel.cancelled() => {}
    }
}

/// Build a REFUSED response echoing the question, or nothing for
/// messages that are not queries.
fn refused_reply(query: &[u8]) -> Option<Vec<u8>> {
    if query.len() < HEADER_LEN || query[2] & 0x80 != 0 {
        return None;
    }

    let qdcount = u16::from_be_bytes([query[4], query[5]]);
    let end = if qdcount == 1 { question_end(query) } else { None };

    let mut reply = query[..end.unwrap_or(HEADER_LEN)].to_vec();
    // QR set, opcode and RD kept
    reply[2] = (query[2] & 0x79) | 0x80;
    reply[3] = RCODE_REFUSED;
    let qd = if end.is_some() { 1u16 } else { 0 };
    reply[4..6].copy_from_slice(&qd.to_be_bytes());
    reply[6..12].fill(0);

    Some(reply)
}

fn question_end(msg: &[u8]) -> Option<usize> {
    let mut pos = HEADER_LEN;
    loop {
        let len = *msg.get(pos)? as usize;
        pos += 1;
        if len == 0 {
            break;
        }
        if len & 0xc0 != 0 {
            return None;
        }
        pos += len;
    }
    // qtype + qclass
    let end = pos + 4;
    (end <= msg.len()).then_some(end)
}

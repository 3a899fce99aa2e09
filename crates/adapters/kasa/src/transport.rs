//! Request/answer exchange over TCP and discovery broadcast over UDP.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::Instant;

use crate::cipher;
use crate::error::KasaError;

/// Largest answer accepted from a device.
const MAX_FRAME: usize = 64 * 1024;
/// Wake-up period while collecting broadcast answers.
const RECV_SLICE: Duration = Duration::from_millis(500);

/// Send one request to `address` and wait for its answer.
pub async fn query(
    address: IpAddr,
    port: u16,
    request: &Value,
    timeout: Duration,
) -> Result<Value, KasaError> {
    tokio::time::timeout(timeout, exchange(address, port, request))
        .await
        .unwrap_or(Err(KasaError::Timeout { after: timeout }))
}

async fn exchange(address: IpAddr, port: u16, request: &Value) -> Result<Value, KasaError> {
    let io = |source| KasaError::Io { address, source };
    let mut stream = TcpStream::connect(SocketAddr::new(address, port))
        .await
        .map_err(io)?;
    stream
        .write_all(&cipher::frame(request.to_string().as_bytes()))
        .await
        .map_err(io)?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.map_err(io)?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME {
        return Err(KasaError::FrameTooLarge { len });
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.map_err(io)?;
    serde_json::from_slice(&cipher::decrypt(&body)).map_err(KasaError::Json)
}

/// Broadcast `request` and collect every answer until `timeout` elapses.
///
/// Answers are keyed by sender; a device answering twice is kept once.
pub async fn broadcast(
    target: Ipv4Addr,
    port: u16,
    request: &Value,
    timeout: Duration,
) -> Result<Vec<(IpAddr, Value)>, KasaError> {
    let local = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    let io = |source| KasaError::Io {
        address: IpAddr::V4(target),
        source,
    };
    let socket = UdpSocket::bind(SocketAddr::new(local, 0)).await.map_err(io)?;
    socket.set_broadcast(true).map_err(io)?;
    socket
        .send_to(
            &cipher::encrypt(request.to_string().as_bytes()),
            SocketAddr::new(IpAddr::V4(target), port),
        )
        .await
        .map_err(io)?;

    let mut answers: HashMap<IpAddr, Value> = HashMap::new();
    let mut buffer = vec![0u8; MAX_FRAME];
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        let slice = RECV_SLICE.min(deadline.saturating_duration_since(Instant::now()));
        match tokio::time::timeout(slice, socket.recv_from(&mut buffer)).await {
            Ok(Ok((size, from))) => match serde_json::from_slice(&cipher::decrypt(&buffer[..size])) {
                Ok(answer) => {
                    answers.insert(from.ip(), answer);
                }
                Err(err) => {
                    tracing::debug!(%from, error = %err, "ignoring unreadable broadcast answer");
                }
            },
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "broadcast receive failed");
            }
            Err(_) => {}
        }
    }
    Ok(answers.into_iter().collect())
}

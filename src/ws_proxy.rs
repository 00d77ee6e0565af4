// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # WebSocket 代理模块
//!
//! 升级请求的处理分两段：
//! 1. 握手转发：向后端重新发起升级请求，只接受 `101`，随后把后端的状态行与头部原样写回客户端。
//! 2. 帧中继：客户端 → 后端、后端 → 客户端两个循环并发运行，任一结束即拆除整个会话。
//!
//! 握手失败时不会向客户端写入任何字节，由调用方返回 `502`。
//! 任一方向出现超过 `max_frame_bytes` 的帧时，向两端发送 1009 CLOSE 后拆除会话。

use std::fmt;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::config::{ProxyTarget, ProxyTimeouts};
use crate::exception::Exception;
use crate::param::{CRLF, READ_CHUNK_SIZE};
use crate::proxy::relative_path;
use crate::request::Request;
use crate::tls;
use crate::websocket::{OpCode, WebSocketFrame, CLOSE_MESSAGE_TOO_BIG};

/// 握手阶段由代理重新生成的头部
const REGENERATED_HEADERS: [&str; 5] = [
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// 握手响应头部的最大字节数
const MAX_HANDSHAKE_SIZE: usize = 64 * 1024;

/// 明文或 TLS 的后端连接
pub trait BackendStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> BackendStream for T {}

type Backend = BufReader<Box<dyn BackendStream>>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToBackend => write!(f, "客户端 -> 后端"),
            Direction::BackendToClient => write!(f, "后端 -> 客户端"),
        }
    }
}

pub struct WebSocketProxyHandler {
    connector: TlsConnector,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    max_frame_size: usize,
}

impl WebSocketProxyHandler {
    pub fn new(timeouts: &ProxyTimeouts) -> Result<Self, Exception> {
        Ok(Self {
            connector: tls::backend_connector()?,
            connect_timeout: Duration::from_secs(timeouts.connect_timeout_secs),
            handshake_timeout: Duration::from_secs(timeouts.timeout_secs),
            max_frame_size: timeouts.max_frame_bytes,
        })
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// 完成握手转发并中继帧，直到任一方关闭。
    ///
    /// 握手失败返回 `Err`，此时客户端尚未收到任何数据。
    /// 101 头部写出失败及之后的 I/O 错误只记录日志，连接已切换协议，不再应答 HTTP 错误。
    pub async fn handle_upgrade<S>(
        &self,
        client: &mut S,
        request: &Request,
        target: &ProxyTarget,
        id: u128,
    ) -> Result<(), Exception>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (backend, header_block) =
            match tokio::time::timeout(self.handshake_timeout, self.handshake(request, target, id)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Exception::BackendTimeout(format!(
                        "WebSocket handshake with {} timed out",
                        target.base_url()
                    )))
                }
            };

        let written = match client.write_all(&header_block).await {
            Ok(()) => client.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!("[ID{}]向客户端写出 101 响应失败，关闭两端连接：{}", id, e);
            return Ok(());
        }
        info!("[ID{}]WebSocket 握手完成，开始中继 {}", id, target.base_url());

        relay(client, backend, self.max_frame_size, id).await;
        info!("[ID{}]WebSocket 会话结束", id);
        Ok(())
    }

    async fn connect(&self, target: &ProxyTarget) -> Result<Box<dyn BackendStream>, Exception> {
        let address = (target.host.as_str(), target.port);
        let tcp = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Exception::BackendUnreachable(format!(
                    "cannot connect to {}: {}",
                    target.base_url(),
                    e
                )))
            }
            Err(_) => {
                return Err(Exception::BackendTimeout(format!(
                    "connect to {} timed out",
                    target.base_url()
                )))
            }
        };
        if !target.ssl {
            return Ok(Box::new(tcp));
        }
        let stream = self
            .connector
            .connect(tls::server_name(&target.host)?, tcp)
            .await
            .map_err(|e| Exception::BackendFailure(format!("TLS handshake failed: {}", e)))?;
        Ok(Box::new(stream))
    }

    /// 连接后端并完成升级握手，返回后端连接与需要转发给客户端的完整响应头部
    async fn handshake(
        &self,
        request: &Request,
        target: &ProxyTarget,
        id: u128,
    ) -> Result<(Backend, Vec<u8>), Exception> {
        let mut backend = BufReader::new(self.connect(target).await?);
        backend
            .write_all(handshake_request(request, target).as_bytes())
            .await?;
        backend.flush().await?;

        let mut header_block = Vec::new();
        let read = backend.read_until(b'\n', &mut header_block).await?;
        if read == 0 {
            return Err(Exception::HandshakeRejected(
                "backend closed the connection before responding".to_string(),
            ));
        }
        let status_line = String::from_utf8_lossy(&header_block).trim_end().to_string();
        if status_line.split_whitespace().nth(1) != Some("101") {
            warn!("[ID{}]后端拒绝 WebSocket 升级：{}", id, status_line);
            return Err(Exception::HandshakeRejected(status_line));
        }

        loop {
            let start = header_block.len();
            let read = backend.read_until(b'\n', &mut header_block).await?;
            if read == 0 {
                return Err(Exception::HandshakeRejected(
                    "incomplete handshake response".to_string(),
                ));
            }
            if header_block.len() > MAX_HANDSHAKE_SIZE {
                return Err(Exception::HandshakeRejected(
                    "handshake response too large".to_string(),
                ));
            }
            let line = &header_block[start..];
            if line == b"\r\n" || line == b"\n" {
                break;
            }
        }
        Ok((backend, header_block))
    }
}

/// 构造发往后端的升级请求
pub fn handshake_request(request: &Request, target: &ProxyTarget) -> String {
    let mut path = relative_path(request.path(), &target.path);
    if !request.query().is_empty() {
        path.push('?');
        path.push_str(&request.query().encode());
    }
    let mut head = format!("{} {} HTTP/1.1{}", request.method(), path, CRLF);
    head.push_str(&format!("Host: {}:{}{}", target.host, target.port, CRLF));
    head.push_str(&format!("Upgrade: websocket{}", CRLF));
    head.push_str(&format!("Connection: Upgrade{}", CRLF));
    for name in ["sec-websocket-key", "sec-websocket-version"] {
        if let Some(value) = request.header(name) {
            head.push_str(&format!("{}: {}{}", name, value, CRLF));
        }
    }
    for (name, value) in request.headers() {
        if !REGENERATED_HEADERS.contains(&name.as_str()) {
            head.push_str(&format!("{}: {}{}", name, value, CRLF));
        }
    }
    head.push_str(CRLF);
    head
}

/// 双向中继，任一方向结束后关闭两端连接
async fn relay<S>(client: &mut S, backend: Backend, max_frame_size: usize, id: u128)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);

    let ended = tokio::select! {
        result = forward_frames(&mut client_read, &mut backend_write, Direction::ClientToBackend, max_frame_size, id) => {
            (Direction::ClientToBackend, result)
        }
        result = forward_frames(&mut backend_read, &mut client_write, Direction::BackendToClient, max_frame_size, id) => {
            (Direction::BackendToClient, result)
        }
    };
    match ended {
        (direction, Ok(())) => debug!("[ID{}]{} 方向结束", id, direction),
        (direction, Err(e @ Exception::FrameTooLarge { .. })) => {
            warn!("[ID{}]{} {}，以 1009 关闭会话", id, direction, e);
            let to_client = WebSocketFrame::close(CLOSE_MESSAGE_TOO_BIG, "message too big", false);
            let to_backend = WebSocketFrame::close(CLOSE_MESSAGE_TOO_BIG, "message too big", true);
            let _ = client_write.write_all(&to_client.to_bytes()).await;
            let _ = client_write.flush().await;
            let _ = backend_write.write_all(&to_backend.to_bytes()).await;
            let _ = backend_write.flush().await;
        }
        (direction, Err(e)) => warn!("[ID{}]{} 中继出错：{}", id, direction, e),
    }

    let _ = backend_write.shutdown().await;
    let _ = client_write.shutdown().await;
}

/// 从 `reader` 读取字节，逐帧解析后写入 `writer`。遇到 CLOSE 帧或 EOF 时返回，
/// 帧声明长度超过 `max_frame_size` 时返回 `FrameTooLarge`。
async fn forward_frames<R, W>(
    reader: &mut R,
    writer: &mut W,
    direction: Direction,
    max_frame_size: usize,
    id: u128,
) -> Result<(), Exception>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(READ_CHUNK_SIZE);
    loop {
        if reader.read_buf(&mut buffer).await? == 0 {
            return Ok(());
        }
        while let Some((frame, consumed)) = WebSocketFrame::parse_with_limit(&buffer, max_frame_size)? {
            buffer.advance(consumed);
            if !frame.opcode.is_heartbeat() {
                debug!(
                    "[ID{}]{} {:?} 帧，{} 字节",
                    id,
                    direction,
                    frame.opcode,
                    frame.payload.len()
                );
            }
            writer.write_all(&frame.to_bytes()).await?;
            if frame.opcode == OpCode::Close {
                writer.flush().await?;
                return Ok(());
            }
        }
        writer.flush().await?;
    }
}

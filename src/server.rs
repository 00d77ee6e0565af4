// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 连接服务器
//!
//! 负责监听端口、接收连接，并为每个连接启动一个独立的异步任务：
//! 读取请求 → 解析 → 分发 → 写回响应 → 关闭连接。每个连接只处理一个请求。
//!
//! 停机时先停止接收新连接，在宽限期内等待进行中的任务结束，超时后强制中止剩余任务，
//! 被中止任务持有的所有 socket（包括 WebSocket 中继的两端）随之关闭。

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

use crate::config::Config;
use crate::dispatcher::{Dispatch, Dispatcher};
use crate::exception::Exception;
use crate::param::{HttpVersion, MAX_REQUEST_SIZE, READ_CHUNK_SIZE};
use crate::request::{expected_length, Request};
use crate::response::Response;
use crate::tls;

/// 停机时等待进行中连接的默认宽限期
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// 供控制台与测试使用的服务器句柄：发出停机信号、查询状态、重载配置
#[derive(Clone)]
pub struct ServerHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
    active: Arc<AtomicUsize>,
    dispatcher: Arc<Dispatcher>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

/// 连接存活期间计数加一，析构时（含任务被中止）减一
struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ConnectionServer {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    read_timeout: Duration,
    grace_period: Duration,
    handle: ServerHandle,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConnectionServer {
    /// 按配置绑定监听地址，设置 backlog，启用 SSL 时加载证书。
    pub async fn bind(config: &Config, dispatcher: Arc<Dispatcher>) -> Result<Self, Exception> {
        let address: SocketAddr = tokio::net::lookup_host(config.bind_address())
            .await?
            .next()
            .ok_or_else(|| {
                Exception::InvalidConfig(format!("cannot resolve {}", config.bind_address()))
            })?;
        let socket = if address.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(address)?;
        let listener = socket.listen(config.server().backlog)?;
        info!("服务端在 {} 上监听Socket连接", listener.local_addr()?);

        let acceptor = if config.ssl().enabled {
            let cert = config.ssl().cert_file.as_deref().unwrap_or_default();
            let key = config.ssl().key_file.as_deref().unwrap_or_default();
            let acceptor = tls::load_acceptor(Path::new(cert), Path::new(key))?;
            info!("SSL 已启用，证书：{}", cert);
            Some(acceptor)
        } else {
            None
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            listener,
            acceptor,
            read_timeout: Duration::from_secs(config.server().read_timeout_secs),
            grace_period: SHUTDOWN_GRACE_PERIOD,
            handle: ServerHandle {
                shutdown_tx: Arc::new(shutdown_tx),
                active: Arc::new(AtomicUsize::new(0)),
                dispatcher,
            },
            shutdown_rx,
        })
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Exception> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// 主事件循环，直到收到停机信号
    pub async fn run(self) -> Result<(), Exception> {
        let Self {
            listener,
            acceptor,
            read_timeout,
            grace_period,
            handle,
            mut shutdown_rx,
        } = self;
        let mut tasks = JoinSet::new();
        let mut id: u128 = 0;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("主循环接收到停机指令，正在退出...");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!("接收连接失败：{}", e);
                            continue;
                        }
                    };
                    debug!("[ID{}]TCP连接已建立：{}", id, peer);
                    let guard = ConnectionGuard::new(Arc::clone(&handle.active));
                    let dispatcher = Arc::clone(&handle.dispatcher);
                    let acceptor = acceptor.clone();
                    tasks.spawn(async move {
                        let _guard = guard;
                        match acceptor {
                            Some(acceptor) => {
                                match tokio::time::timeout(read_timeout, acceptor.accept(stream)).await {
                                    Ok(Ok(mut tls_stream)) => {
                                        handle_connection(&mut tls_stream, peer, &dispatcher, read_timeout, id).await
                                    }
                                    Ok(Err(e)) => warn!("[ID{}]TLS 握手失败：{}", id, e),
                                    Err(_) => warn!("[ID{}]TLS 握手超时", id),
                                }
                            }
                            None => {
                                let mut stream = stream;
                                handle_connection(&mut stream, peer, &dispatcher, read_timeout, id).await
                            }
                        }
                    });
                    id += 1;
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(listener);
        let pending = tasks.len();
        if pending > 0 {
            info!("等待 {} 个进行中的连接结束", pending);
        }
        let drained = tokio::time::timeout(grace_period, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if !drained {
            warn!("宽限期已过，强制关闭 {} 个连接", tasks.len());
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
        info!("服务器已停止");
        Ok(())
    }
}

/// 处理单个连接上的一个请求。所有失败路径都会尽量写回一个完整的 HTTP 响应。
pub async fn handle_connection<S>(
    stream: &mut S,
    peer: SocketAddr,
    dispatcher: &Dispatcher,
    read_timeout: Duration,
    id: u128,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let buffer = match tokio::time::timeout(read_timeout, read_request(stream)).await {
        Err(_) => {
            warn!("[ID{}]读取请求超时，关闭连接", id);
            return;
        }
        Ok(Err(Exception::RequestTooLarge)) => {
            warn!("[ID{}]请求超过 {} 字节上限", id, MAX_REQUEST_SIZE);
            let response = dispatcher.error_response(&Exception::RequestTooLarge);
            write_response(stream, &response, id).await;
            return;
        }
        Ok(Err(e)) => {
            error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
            return;
        }
        Ok(Ok(buffer)) if buffer.is_empty() => return,
        Ok(Ok(buffer)) => buffer,
    };
    debug!("[ID{}]HTTP请求接收完毕，{} 字节", id, buffer.len());

    let start_time = Instant::now();
    let request = match Request::try_from(&buffer, id) {
        Ok(request) => request,
        Err(e) => {
            warn!("[ID{}]来自 {} 的请求无法解析，返回400", id, peer);
            let response = dispatcher.error_response(&e);
            write_response(stream, &response, id).await;
            return;
        }
    };

    let outcome = AssertUnwindSafe(dispatcher.dispatch(&request, peer, id))
        .catch_unwind()
        .await;
    let mut response = match outcome {
        Ok(Dispatch::Respond(response)) => response,
        Ok(Dispatch::Upgrade(target)) => {
            match dispatcher
                .ws_proxy()
                .handle_upgrade(stream, &request, &target, id)
                .await
            {
                Ok(()) => return,
                Err(e) => {
                    warn!("[ID{}]WebSocket 升级失败：{}", id, e);
                    dispatcher.error_response(&e)
                }
            }
        }
        Err(_) => {
            error!("[ID{}]处理请求时发生未知异常", id);
            dispatcher.error_response(&Exception::Internal("request handler panicked".to_string()))
        }
    };

    if request.version() == "HTTP/1.0" {
        response.set_version(HttpVersion::V1_0);
    }

    debug!(
        "[ID{}]HTTP响应构建完成，服务端用时{}ms。",
        id,
        start_time.elapsed().as_millis()
    );
    info!(
        "[ID{}] {}, {}, {}, {}, {}, {}",
        id,
        request.version(),
        request.path(),
        request.method(),
        response.status_code(),
        response.information(),
        request.header("user-agent").unwrap_or("-"),
    );
    write_response(stream, &response, id).await;
}

/// 读取到头部结束并收齐 `content-length` 声明的正文，或对端关闭
async fn read_request<S>(stream: &mut S) -> Result<Vec<u8>, Exception>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(READ_CHUNK_SIZE);
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buffer);
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.len() > MAX_REQUEST_SIZE {
            return Err(Exception::RequestTooLarge);
        }
        if let Some(expected) = expected_length(&buffer) {
            if expected > MAX_REQUEST_SIZE {
                return Err(Exception::RequestTooLarge);
            }
            if buffer.len() >= expected {
                return Ok(buffer);
            }
        }
    }
}

async fn write_response<S>(stream: &mut S, response: &Response, id: u128)
where
    S: AsyncWrite + Unpin,
{
    let bytes = response.as_bytes();
    debug!("[ID{}]发送全量响应，长度: {}", id, bytes.len());
    if let Err(e) = stream.write_all(&bytes).await {
        warn!("[ID{}]发送响应失败：{}", id, e);
        return;
    }
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}

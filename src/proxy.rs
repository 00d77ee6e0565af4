// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 反向代理模块
//!
//! 将匹配到代理挂载前缀的请求转发给后端：
//! 1. 剥离挂载前缀，拼出后端 URL（查询字符串重新编码）。
//! 2. 过滤逐跳头部，注入 `X-Forwarded-*` 与 `X-Real-IP`。
//! 3. 不自动跟随重定向，后端的 3xx 原样返回；指向后端自身的 `Location` 改写回代理路径。
//!
//! 出站 HTTP 客户端在服务器启动时创建一次，所有连接共享其连接池。

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use log::{error, info, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use tokio::net::TcpStream;
use url::Url;

use crate::config::{ProxyTarget, ProxyTimeouts};
use crate::exception::Exception;
use crate::param::{is_hop_by_hop, server_ident};
use crate::request::Request;
use crate::response::{HeaderList, Response};

/// 需要做 URL 改写的响应头部
const REWRITTEN_HEADERS: [&str; 3] = ["location", "content-location", "uri"];

#[derive(Clone)]
pub struct ProxyHandler {
    client: reqwest::Client,
}

impl ProxyHandler {
    /// 创建共享客户端：总超时、更短的连接超时，禁止自动重定向
    pub fn new(timeouts: &ProxyTimeouts) -> Result<Self, Exception> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.timeout_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_timeout_secs))
            .redirect(Policy::none())
            .build()
            .map_err(|e| Exception::InvalidConfig(format!("failed to build proxy client: {}", e)))?;
        Ok(Self { client })
    }

    /// 将请求转发到 `target` 并把后端响应转换为客户端响应。
    ///
    /// # 参数
    /// * `peer` - 客户端地址，用于 `X-Forwarded-For` 与 `X-Real-IP`。
    /// * `tls` - 客户端连接是否经过 TLS，决定 `X-Forwarded-Proto`。
    pub async fn forward(
        &self,
        request: &Request,
        target: &ProxyTarget,
        peer: SocketAddr,
        tls: bool,
        id: u128,
    ) -> Result<Response, Exception> {
        let relative = relative_path(request.path(), &target.path);
        let url = build_target_url(target, &relative, request);
        info!("[ID{}]代理 {} {} -> {}", id, request.method(), request.path(), url);

        let method = reqwest::Method::from_bytes(request.method().as_bytes())
            .map_err(|_| Exception::MalformedRequest)?;
        let mut headers = HeaderMap::new();
        for (name, value) in outbound_headers(request, peer, tls) {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("[ID{}]丢弃无法转发的请求头：{}", id, name),
            }
        }

        let mut outbound = self.client.request(method, url.as_str()).headers(headers);
        if !request.body().is_empty() {
            outbound = outbound.body(request.body().clone());
        }
        let upstream = outbound.send().await.map_err(|e| {
            let exception = classify_error(&e);
            error!("[ID{}]后端 {} 请求失败：{}", id, target.base_url(), exception);
            exception
        })?;

        let status = upstream.status().as_u16();
        let mut response_headers = HeaderList::new();
        for (name, value) in upstream.headers() {
            let name = name.as_str();
            if is_hop_by_hop(name) || name == "server" {
                continue;
            }
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            if REWRITTEN_HEADERS.contains(&name) {
                response_headers.append(name, rewrite_location(&value, target));
            } else {
                response_headers.append(name, value);
            }
        }
        response_headers.append("via", format!("1.1 {}", server_ident()));

        let body: Bytes = upstream.bytes().await.map_err(|e| {
            let exception = classify_error(&e);
            error!("[ID{}]读取后端响应体失败：{}", id, exception);
            exception
        })?;
        info!("[ID{}]后端返回 {} ({} 字节)", id, status, body.len());

        Response::new(status, response_headers, body).map_err(|_| {
            Exception::BackendFailure(format!("backend returned unsupported status {}", status))
        })
    }
}

/// 请求路径是否位于代理挂载前缀之下（纯前缀比较）
pub fn matches_mount(path: &str, target: &ProxyTarget) -> bool {
    path.starts_with(&target.path)
}

/// 剥离挂载前缀，结果总以 `/` 开头
pub fn relative_path(path: &str, mount: &str) -> String {
    let mount = mount.trim_end_matches('/');
    let rest = path.strip_prefix(mount).unwrap_or(path);
    if rest.is_empty() {
        "/".to_string()
    } else if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{}", rest)
    }
}

pub fn build_target_url(target: &ProxyTarget, relative: &str, request: &Request) -> String {
    let mut url = format!("{}{}", target.base_url(), relative);
    if !request.query().is_empty() {
        url.push('?');
        url.push_str(&request.query().encode());
    }
    url
}

/// 计算出站请求头：剔除逐跳头部，并注入转发相关头部
pub fn outbound_headers(request: &Request, peer: SocketAddr, tls: bool) -> Vec<(String, String)> {
    let client_ip = peer.ip().to_string();
    let mut headers: Vec<(String, String)> = request
        .headers()
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .filter(|(name, _)| {
            !matches!(
                name.as_str(),
                "x-forwarded-for" | "x-forwarded-host" | "x-forwarded-proto" | "x-real-ip"
            )
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    let forwarded_for = match request.header("x-forwarded-for") {
        Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing.trim(), client_ip),
        _ => client_ip.clone(),
    };
    headers.push(("x-forwarded-for".to_string(), forwarded_for));
    if let Some(host) = request.header("host") {
        headers.push(("x-forwarded-host".to_string(), host.to_string()));
    }
    let proto = if tls { "https" } else { "http" };
    headers.push(("x-forwarded-proto".to_string(), proto.to_string()));
    headers.push(("x-real-ip".to_string(), client_ip));
    headers
}

/// 把指向后端自身 `scheme://host:port` 的绝对 URL 改写为带挂载前缀的相对路径。
/// 相对 URL 与外部 URL 原样返回。
pub fn rewrite_location(value: &str, target: &ProxyTarget) -> String {
    let Ok(url) = Url::parse(value) else {
        return value.to_string();
    };
    let same_origin = url.scheme() == target.scheme()
        && url
            .host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(&target.host))
        && url.port_or_known_default() == Some(target.port);
    if !same_origin {
        return value.to_string();
    }
    let mut rewritten = format!("{}{}", target.path.trim_end_matches('/'), url.path());
    if let Some(query) = url.query() {
        rewritten.push('?');
        rewritten.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        rewritten.push('#');
        rewritten.push_str(fragment);
    }
    rewritten
}

/// 把路由扩展中的 `proxy_pass` 地址转换为挂载在 `/` 的代理目标
pub fn target_from_proxy_pass(proxy_pass: &str) -> Result<ProxyTarget, Exception> {
    let url = Url::parse(proxy_pass)
        .map_err(|e| Exception::InvalidConfig(format!("invalid proxy_pass {}: {}", proxy_pass, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| Exception::InvalidConfig(format!("proxy_pass {} has no host", proxy_pass)))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Exception::InvalidConfig(format!("proxy_pass {} has no port", proxy_pass)))?;
    Ok(ProxyTarget {
        path: "/".to_string(),
        host: host.to_string(),
        port,
        ssl: url.scheme() == "https",
    })
}

/// 超时优先判定，其次是连接 / 解析失败，其余归为一般传输错误
fn classify_error(e: &reqwest::Error) -> Exception {
    if e.is_timeout() {
        Exception::BackendTimeout(e.to_string())
    } else if e.is_connect() {
        Exception::BackendUnreachable(e.to_string())
    } else {
        Exception::BackendFailure(e.to_string())
    }
}

/// 逐个以 TCP 连接探测代理目标，返回不可达目标的描述
pub async fn check_backends(targets: &[ProxyTarget], connect_timeout: Duration) -> Vec<String> {
    let mut unreachable = Vec::new();
    for target in targets {
        let attempt = TcpStream::connect((target.host.as_str(), target.port));
        match tokio::time::timeout(connect_timeout, attempt).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => unreachable.push(format!("{} ({}): {}", target.path, target.base_url(), e)),
            Err(_) => unreachable.push(format!("{} ({}): connect timed out", target.path, target.base_url())),
        }
    }
    unreachable
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn target(path: &str, host: &str, port: u16) -> ProxyTarget {
        ProxyTarget {
            path: path.to_string(),
            host: host.to_string(),
            port,
            ssl: false,
        }
    }

    fn peer() -> SocketAddr {
        "10.0.0.7:51234".parse().unwrap()
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(relative_path("/api/widgets", "/api"), "/widgets");
        assert_eq!(relative_path("/api", "/api"), "/");
        assert_eq!(relative_path("/api/", "/api/"), "/");
        assert_eq!(relative_path("/apiary", "/api"), "/ary");
        assert_eq!(relative_path("/anything", "/"), "/anything");
    }

    #[test]
    fn test_build_target_url() {
        let request = Request::parse(b"GET /api/widgets?x=1 HTTP/1.1\r\nHost: gw\r\n\r\n");
        let target = target("/api", "localhost", 9001);
        let relative = relative_path(request.path(), &target.path);
        assert_eq!(
            build_target_url(&target, &relative, &request),
            "http://localhost:9001/widgets?x=1"
        );
    }

    #[test]
    fn test_outbound_headers_strip_hop_by_hop() {
        let raw = b"GET /api/x HTTP/1.1\r\nHost: gw.example\r\nConnection: keep-alive\r\nKeep-Alive: timeout=5\r\nTE: trailers\r\nContent-Length: 0\r\nAccept: */*\r\n\r\n";
        let request = Request::parse(raw);
        let headers = outbound_headers(&request, peer(), false);
        let get = |n: &str| headers.iter().find(|(k, _)| k == n).map(|(_, v)| v.as_str());

        for hop in ["connection", "keep-alive", "te", "host", "content-length"] {
            assert!(get(hop).is_none(), "{} should be stripped", hop);
        }
        assert_eq!(get("accept"), Some("*/*"));
        assert_eq!(get("x-forwarded-for"), Some("10.0.0.7"));
        assert_eq!(get("x-forwarded-host"), Some("gw.example"));
        assert_eq!(get("x-forwarded-proto"), Some("http"));
        assert_eq!(get("x-real-ip"), Some("10.0.0.7"));
    }

    /// 已有的 X-Forwarded-For 链被保留并追加当前客户端
    #[test]
    fn test_forwarded_for_appends() {
        let raw = b"GET / HTTP/1.1\r\nX-Forwarded-For: 203.0.113.9\r\n\r\n";
        let headers = outbound_headers(&Request::parse(raw), peer(), true);
        let xff: Vec<_> = headers.iter().filter(|(k, _)| k == "x-forwarded-for").collect();
        assert_eq!(xff.len(), 1);
        assert_eq!(xff[0].1, "203.0.113.9, 10.0.0.7");
        assert!(headers.contains(&("x-forwarded-proto".to_string(), "https".to_string())));
    }

    #[test]
    fn test_rewrite_location() {
        let backend = target("/app", "backend", 9000);
        assert_eq!(rewrite_location("http://backend:9000/new", &backend), "/app/new");
        assert_eq!(
            rewrite_location("http://backend:9000/a/b?c=d#top", &backend),
            "/app/a/b?c=d#top"
        );
        assert_eq!(
            rewrite_location("http://other.example/x", &backend),
            "http://other.example/x"
        );
        assert_eq!(rewrite_location("/relative", &backend), "/relative");
        assert_eq!(
            rewrite_location("https://backend:9000/new", &backend),
            "https://backend:9000/new"
        );
    }

    /// 省略默认端口的地址同样视为后端自身
    #[test]
    fn test_rewrite_location_default_port() {
        let backend = target("/", "backend", 80);
        assert_eq!(rewrite_location("http://backend/login", &backend), "/login");
    }

    #[test]
    fn test_target_from_proxy_pass() {
        let t = target_from_proxy_pass("https://api.internal").unwrap();
        assert_eq!(t.port, 443);
        assert!(t.ssl);
        assert_eq!(t.path, "/");
        assert!(target_from_proxy_pass("not a url").is_err());
    }

    /// 启动只应答一次的模拟后端，返回其端口与收到的原始请求。`reply` 接收后端端口生成应答。
    async fn mock_backend<F>(reply: F) -> (u16, oneshot::Receiver<String>)
    where
        F: FnOnce(u16) -> String,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let reply = reply(port);
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buffer = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buffer.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buffer.extend_from_slice(&chunk[..n]);
            }
            let _ = tx.send(String::from_utf8_lossy(&buffer).into_owned());
            stream.write_all(reply.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        });
        (port, rx)
    }

    #[tokio::test]
    async fn test_forward_rewrites_response() {
        let (port, received) = mock_backend(|port| {
            format!(
                "HTTP/1.1 302 Found\r\nLocation: http://127.0.0.1:{}/next?step=2\r\nContent-Location: http://cdn.example/next\r\nServer: backend/1.0\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                port
            )
        })
        .await;
        let handler = ProxyHandler::new(&ProxyTimeouts::default()).unwrap();
        let target = target("/api", "127.0.0.1", port);
        let request = Request::parse(b"GET /api/widgets?x=1 HTTP/1.1\r\nHost: gw\r\nConnection: close\r\n\r\n");

        let response = handler.forward(&request, &target, peer(), false, 1).await.unwrap();
        let raw = received.await.unwrap();

        assert!(raw.starts_with("GET /widgets?x=1 HTTP/1.1\r\n"));
        assert!(raw.to_ascii_lowercase().contains("x-forwarded-host: gw"));
        assert_eq!(response.status_code(), 302);
        assert_eq!(response.content().as_ref(), b"ok");
        assert_eq!(response.header("content-length"), Some("2"));
        assert_eq!(response.header("server"), Some(server_ident().as_str()));
        assert!(response.header("via").unwrap().contains("webgate"));
        assert_eq!(response.header("location"), Some("/api/next?step=2"));
        assert_eq!(response.header("content-location"), Some("http://cdn.example/next"));
    }

    /// 注册表中较少见的状态码与未登记的状态码都原样转发
    #[tokio::test]
    async fn test_forward_relays_uncommon_statuses() {
        let handler = ProxyHandler::new(&ProxyTimeouts::default()).unwrap();
        let request = Request::parse(b"GET /api/doc HTTP/1.1\r\nHost: gw\r\n\r\n");
        let cases = [
            (451, "Unavailable For Legal Reasons"),
            (207, "Multi-Status"),
            (431, "Request Header Fields Too Large"),
            (428, "Precondition Required"),
            (599, "Server Error"),
        ];
        for (code, phrase) in cases {
            let (port, _received) = mock_backend(move |_| {
                format!(
                    "HTTP/1.1 {} Whatever\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbody",
                    code
                )
            })
            .await;
            let response = handler
                .forward(&request, &target("/api", "127.0.0.1", port), peer(), false, 4)
                .await
                .unwrap();
            assert_eq!(response.status_code(), code);
            assert_eq!(response.information(), phrase);
            assert_eq!(response.content().as_ref(), b"body");
        }
    }

    #[tokio::test]
    async fn test_forward_refused_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let handler = ProxyHandler::new(&ProxyTimeouts::default()).unwrap();
        let request = Request::parse(b"GET /api/x HTTP/1.1\r\n\r\n");
        let result = handler
            .forward(&request, &target("/api", "127.0.0.1", port), peer(), false, 2)
            .await;
        match result {
            Err(e) => assert_eq!(e.status_code(), 502),
            Ok(r) => panic!("expected failure, got {}", r.status_code()),
        }
    }

    #[tokio::test]
    async fn test_forward_timeout_is_504() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let timeouts = ProxyTimeouts {
            timeout_secs: 1,
            connect_timeout_secs: 1,
            ..ProxyTimeouts::default()
        };
        let handler = ProxyHandler::new(&timeouts).unwrap();
        let request = Request::parse(b"GET /slow HTTP/1.1\r\n\r\n");
        let result = handler
            .forward(&request, &target("/", "127.0.0.1", port), peer(), false, 3)
            .await;
        assert!(matches!(result, Err(Exception::BackendTimeout(_))));
    }

    #[tokio::test]
    async fn test_check_backends() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = listener.local_addr().unwrap().port();
        let dead = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let targets = vec![target("/live", "127.0.0.1", live), target("/dead", "127.0.0.1", dead)];
        let report = check_backends(&targets, Duration::from_secs(1)).await;
        assert_eq!(report.len(), 1);
        assert!(report[0].starts_with("/dead"));
    }
}

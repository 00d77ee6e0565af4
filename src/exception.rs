// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 定义服务器在配置加载、请求处理、反向代理与 WebSocket 转发过程中可能出现的异常。
//!
//! 每个变体都通过 [`Exception::status_code`] 映射到连接处理层最终返回给客户端的 HTTP 状态码，
//! 通过实现 `std::fmt::Display` 保证错误信息可以直接写入日志。

use std::fmt;
use std::io;

/// 服务器处理过程中发生的异常类型。
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    /// 请求行无法解析，或缺少方法 / 路径。对应 `400 Bad Request`。
    MalformedRequest,
    /// 请求体积超过上限。对应 `413 Content Too Large`。
    RequestTooLarge,
    /// 请求的文件不存在。对应 `404 Not Found`。
    FileNotFound,
    /// 目录遍历尝试或访问目录本身。对应 `403 Forbidden`。
    Forbidden,
    /// 状态码不在标准注册表中，响应无法构造。
    UnknownStatusCode(u16),
    /// 后端拒绝连接或域名解析失败。对应 `502 Bad Gateway`。
    BackendUnreachable(String),
    /// 后端响应超时（含连接阶段超时）。对应 `504 Gateway Timeout`。
    BackendTimeout(String),
    /// 其他后端传输错误。对应 `502 Bad Gateway`。
    BackendFailure(String),
    /// WebSocket 握手被后端拒绝（非 101 状态或报文不完整）。对应 `502 Bad Gateway`。
    HandshakeRejected(String),
    /// WebSocket 帧格式非法（保留操作码、长度溢出）。
    InvalidFrame(String),
    /// WebSocket 帧声明的负载长度超过上限，中继以 1009 关闭会话。
    FrameTooLarge { length: u64, limit: usize },
    /// 配置文件格式错误或校验失败。
    InvalidConfig(String),
    /// 路由模式无法编译。
    InvalidRoutePattern { pattern: String, reason: String },
    /// 证书或私钥加载失败。
    TlsSetup(String),
    /// 模板文件不存在。
    TemplateNotFound(String),
    /// 底层 I/O 错误。
    Io(String),
    /// 请求处理过程中的意外故障（如处理任务 panic）。对应 `500`。
    Internal(String),
}

use Exception::*;

impl Exception {
    /// 该异常最终返回给客户端的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            MalformedRequest => 400,
            RequestTooLarge => 413,
            FileNotFound => 404,
            Forbidden => 403,
            BackendUnreachable(_) | BackendFailure(_) | HandshakeRejected(_) => 502,
            BackendTimeout(_) => 504,
            _ => 500,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedRequest => write!(f, "Malformed request"),
            RequestTooLarge => write!(f, "Request exceeds the size limit"),
            FileNotFound => write!(f, "File not found"),
            Forbidden => write!(f, "Access to the resource is forbidden"),
            UnknownStatusCode(code) => write!(f, "Unknown status code {}", code),
            BackendUnreachable(detail) => write!(f, "Backend unreachable: {}", detail),
            BackendTimeout(detail) => write!(f, "Backend timed out: {}", detail),
            BackendFailure(detail) => write!(f, "Backend failure: {}", detail),
            HandshakeRejected(detail) => write!(f, "WebSocket handshake rejected: {}", detail),
            InvalidFrame(detail) => write!(f, "Invalid WebSocket frame: {}", detail),
            FrameTooLarge { length, limit } => {
                write!(f, "WebSocket frame of {} bytes exceeds the {} byte limit", length, limit)
            }
            InvalidConfig(detail) => write!(f, "Invalid configuration: {}", detail),
            InvalidRoutePattern { pattern, reason } => {
                write!(f, "Invalid route pattern '{}': {}", pattern, reason)
            }
            TlsSetup(detail) => write!(f, "TLS setup failed: {}", detail),
            TemplateNotFound(name) => write!(f, "Template not found: {}", name),
            Io(detail) => write!(f, "I/O error: {}", detail),
            Internal(detail) => write!(f, "Internal error: {}", detail),
        }
    }
}

impl std::error::Error for Exception {}

impl From<io::Error> for Exception {
    fn from(err: io::Error) -> Self {
        Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(MalformedRequest.status_code(), 400);
        assert_eq!(FileNotFound.status_code(), 404);
        assert_eq!(Forbidden.status_code(), 403);
        assert_eq!(BackendUnreachable("x".into()).status_code(), 502);
        assert_eq!(BackendTimeout("x".into()).status_code(), 504);
        assert_eq!(HandshakeRejected("200".into()).status_code(), 502);
        assert_eq!(Io("boom".into()).status_code(), 500);
        assert_eq!(Internal("panic".into()).status_code(), 500);
    }

    #[test]
    fn test_display_route_pattern() {
        let e = InvalidRoutePattern {
            pattern: "~[".into(),
            reason: "unclosed".into(),
        };
        assert_eq!(e.to_string(), "Invalid route pattern '~[': unclosed");
    }

    #[test]
    fn test_from_io_error() {
        let e: Exception = io::Error::new(io::ErrorKind::Other, "disk").into();
        assert!(matches!(e, Io(_)));
    }
}

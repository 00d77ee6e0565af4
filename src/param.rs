// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 该模块集中定义 `webgate` 在 HTTP / WebSocket 处理中使用的常量：
//! - 状态码及其原因短语（Reason Phrase）。
//! - 静态文件使用的 MIME 类型映射表。
//! - 反向代理需要剥离的逐跳（hop-by-hop）头部。
//! - 服务器标识、请求大小上限等运行参数。

use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;

/// 服务器名称标识，用于 `Server` 与 `Via` 头部
pub const SERVER_NAME: &str = "webgate";

/// 服务器版本号，跟随 crate 版本
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 头部与正文之间的空行分隔符
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// 单个请求（头部 + 正文）允许的最大字节数，超出返回 413
pub const MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// 每次从套接字读取的块大小
pub const READ_CHUNK_SIZE: usize = 8192;

/// 欢迎页中的标识文本
pub const WELCOME_MARKER: &str = "Welcome to webgate!";

/// SPA 回退默认排除的路径前缀
pub const DEFAULT_SPA_EXCLUDES: [&str; 2] = ["/api/", "/admin/"];

/// 静态文件的缓存策略
pub const STATIC_CACHE_CONTROL: &str = "public, max-age=300";

/// 代理转发时不得透传的逐跳头部。
///
/// `host` 与 `content-length` 虽非严格意义上的逐跳头部，但会由代理重新生成，因此一并剔除。
pub const HOP_BY_HOP_HEADERS: [&str; 10] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// 判断头部名称是否属于逐跳头部（大小写不敏感）
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

/// `Server` 头部的完整取值，例如 `webgate/0.1.0`
pub fn server_ident() -> String {
    format!("{}/{}", SERVER_NAME, SERVER_VERSION)
}

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)
    /// 与 IANA HTTP Status Code Registry。表外的 1xx-5xx 状态码使用类别短语，见 [`reason_phrase`]。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = [
        (100, "Continue"),
        (101, "Switching Protocols"),
        (102, "Processing"),
        (103, "Early Hints"),
        (200, "OK"),
        (201, "Created"),
        (202, "Accepted"),
        (203, "Non-Authoritative Information"),
        (204, "No Content"),
        (205, "Reset Content"),
        (206, "Partial Content"),
        (207, "Multi-Status"),
        (208, "Already Reported"),
        (226, "IM Used"),
        (300, "Multiple Choices"),
        (301, "Moved Permanently"),
        (302, "Found"),
        (303, "See Other"),
        (304, "Not Modified"),
        (305, "Use Proxy"),
        (307, "Temporary Redirect"),
        (308, "Permanent Redirect"),
        (400, "Bad Request"),
        (401, "Unauthorized"),
        (402, "Payment Required"),
        (403, "Forbidden"),
        (404, "Not Found"),
        (405, "Method Not Allowed"),
        (406, "Not Acceptable"),
        (407, "Proxy Authentication Required"),
        (408, "Request Timeout"),
        (409, "Conflict"),
        (410, "Gone"),
        (411, "Length Required"),
        (412, "Precondition Failed"),
        (413, "Content Too Large"),
        (414, "URI Too Long"),
        (415, "Unsupported Media Type"),
        (416, "Range Not Satisfiable"),
        (417, "Expectation Failed"),
        (418, "I'm a teapot"),
        (421, "Misdirected Request"),
        (422, "Unprocessable Content"),
        (423, "Locked"),
        (424, "Failed Dependency"),
        (425, "Too Early"),
        (426, "Upgrade Required"),
        (428, "Precondition Required"),
        (429, "Too Many Requests"),
        (431, "Request Header Fields Too Large"),
        (451, "Unavailable For Legal Reasons"),
        (500, "Internal Server Error"),
        (501, "Not Implemented"),
        (502, "Bad Gateway"),
        (503, "Service Unavailable"),
        (504, "Gateway Timeout"),
        (505, "HTTP Version Not Supported"),
        (506, "Variant Also Negotiates"),
        (507, "Insufficient Storage"),
        (508, "Loop Detected"),
        (510, "Not Extended"),
        (511, "Network Authentication Required"),
    ]
    .into_iter()
    .collect();
}

/// 状态码的原因短语。未登记但位于 100-599 的状态码取所属类别的通用短语，其余返回 `None`。
pub fn reason_phrase(code: u16) -> Option<&'static str> {
    if let Some(text) = STATUS_CODES.get(&code).copied() {
        return Some(text);
    }
    match code {
        100..=199 => Some("Informational"),
        200..=299 => Some("Success"),
        300..=399 => Some("Redirection"),
        400..=499 => Some("Client Error"),
        500..=599 => Some("Server Error"),
        _ => None,
    }
}

lazy_static! {
    /// 文件后缀名到 MIME 类型（Media Type）的映射表。
    pub static ref MIME_TYPES: HashMap<&'static str, &'static str> = [
        ("avif", "image/avif"),
        ("bin", "application/octet-stream"),
        ("bmp", "image/bmp"),
        ("css", "text/css; charset=utf-8"),
        ("csv", "text/csv"),
        ("gif", "image/gif"),
        ("gz", "application/gzip"),
        ("htm", "text/html; charset=utf-8"),
        ("html", "text/html; charset=utf-8"),
        ("ico", "image/x-icon"),
        ("jpeg", "image/jpeg"),
        ("jpg", "image/jpeg"),
        ("js", "application/javascript; charset=utf-8"),
        ("json", "application/json"),
        ("map", "application/json"),
        ("md", "text/markdown; charset=utf-8"),
        ("mjs", "application/javascript; charset=utf-8"),
        ("mp3", "audio/mpeg"),
        ("mp4", "video/mp4"),
        ("otf", "font/otf"),
        ("pdf", "application/pdf"),
        ("png", "image/png"),
        ("svg", "image/svg+xml"),
        ("tar", "application/x-tar"),
        ("ttf", "font/ttf"),
        ("txt", "text/plain; charset=utf-8"),
        ("wasm", "application/wasm"),
        ("wav", "audio/wav"),
        ("webm", "video/webm"),
        ("webmanifest", "application/manifest+json"),
        ("webp", "image/webp"),
        ("woff", "font/woff"),
        ("woff2", "font/woff2"),
        ("xml", "text/xml"),
        ("zip", "application/zip"),
    ]
    .into_iter()
    .collect();
}

/// 根据文件后缀获取 MIME 类型，未知后缀返回 `application/octet-stream`
pub fn mime_for_extension(extension: &str) -> &'static str {
    MIME_TYPES
        .get(extension.to_ascii_lowercase().as_str())
        .copied()
        .unwrap_or("application/octet-stream")
}

/// 支持的 HTTP 协议版本
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpVersion {
    /// HTTP/1.0 版本
    V1_0,
    /// HTTP/1.1 版本
    V1_1,
}

/// 支持的内容编码（压缩）格式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpEncoding {
    /// GNU zip 压缩
    Gzip,
    /// zlib 压缩
    Deflate,
    /// Brotli 压缩
    Br,
}

impl fmt::Display for HttpVersion {
    /// 格式化为状态行中的协议标识
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::V1_0 => write!(f, "HTTP/1.0"),
            HttpVersion::V1_1 => write!(f, "HTTP/1.1"),
        }
    }
}

impl fmt::Display for HttpEncoding {
    /// 将枚举格式化为 `Content-Encoding` 头所使用的标识符
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpEncoding::Gzip => write!(f, "gzip"),
            HttpEncoding::Deflate => write!(f, "deflate"),
            HttpEncoding::Br => write!(f, "br"),
        }
    }
}

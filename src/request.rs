// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 该模块负责将 TCP 流中读取的原始字节解析为不可变的 `Request` 值：
//! 1. 以首个空行为界拆分头部与正文。
//! 2. 解析请求行（方法、路径、版本），查询字符串在存储前与路径分离。
//! 3. 解析标头：名称统一转为小写，重复出现时以最后一次为准。
//!
//! 解析本身永不失败：任何无法识别请求行的输入都会得到一个“无效”请求
//! （方法与路径为空），由连接处理层转换为 `400 Bad Request`。

use std::collections::HashMap;

use bytes::Bytes;
use log::warn;
use url::form_urlencoded;

use crate::{exception::Exception, param::*};

/// 查询参数：名称 → 按出现顺序排列的取值序列。名称按首次出现的顺序保存。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams(Vec<(String, Vec<String>)>);

impl QueryParams {
    /// 按 `application/x-www-form-urlencoded` 规则解码（`+` 视为空格，支持百分号编码）
    pub fn parse(raw: &str) -> Self {
        let mut params = QueryParams::default();
        for (name, value) in form_urlencoded::parse(raw.as_bytes()) {
            params.append(name.into_owned(), value.into_owned());
        }
        params
    }

    pub fn append(&mut self, name: String, value: String) {
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => self.0.push((name, vec![value])),
        }
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    /// 重新编码为查询字符串（不含前导 `?`）
    pub fn encode(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (name, value) in self.iter() {
            serializer.append_pair(name, value);
        }
        serializer.finish()
    }
}

/// 一个完整解析后的 HTTP 请求，构造后不可变。
#[derive(Debug, Clone)]
pub struct Request {
    /// 请求方法，按原样保存
    method: String,
    /// 不含查询字符串的绝对路径
    path: String,
    query: QueryParams,
    /// 小写名称 → 原始取值
    headers: HashMap<String, String>,
    body: Bytes,
    version: String,
}

impl Request {
    /// 从原始字节解析请求。缺少 `\r\n\r\n` 或请求行不可解析时返回无效请求。
    pub fn parse(buffer: &[u8]) -> Self {
        let Some(split) = find_header_end(buffer) else {
            return Self::invalid();
        };
        let head = String::from_utf8_lossy(&buffer[..split]);
        let body = Bytes::copy_from_slice(&buffer[split + HEADER_TERMINATOR.len()..]);

        let mut lines = head.split(CRLF);
        let request_line = lines.next().unwrap_or_default();
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() < 2 || parts.len() > 3 || !is_token(parts[0]) {
            return Self::invalid();
        }
        let (path, raw_query) = split_target(parts[1]);
        if !path.starts_with('/') {
            return Self::invalid();
        }
        let version = parts.get(2).copied().unwrap_or("HTTP/1.1").to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            match line.split_once(": ") {
                Some((name, value)) => {
                    headers.insert(name.to_ascii_lowercase(), value.to_string());
                }
                None => warn!("跳过格式错误的请求头：{:?}", line),
            }
        }

        Self {
            method: parts[0].to_string(),
            path,
            query: QueryParams::parse(&raw_query),
            headers,
            body,
            version,
        }
    }

    /// 解析并要求请求有效，无效时返回 `Exception::MalformedRequest`。
    ///
    /// # 参数
    /// * `buffer` - 从网络 Socket 读取的原始数据。
    /// * `id` - 连接 ID，用于日志追踪。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let request = Self::parse(buffer);
        if request.is_valid() {
            Ok(request)
        } else {
            warn!("[ID{}]无法解析HTTP请求行", id);
            Err(Exception::MalformedRequest)
        }
    }

    fn invalid() -> Self {
        Self {
            method: String::new(),
            path: String::new(),
            query: QueryParams::default(),
            headers: HashMap::new(),
            body: Bytes::new(),
            version: String::new(),
        }
    }

    /// 方法与路径均非空时请求有效
    pub fn is_valid(&self) -> bool {
        !self.method.is_empty() && !self.path.is_empty()
    }

    /// 重新序列化为报文字节。头部顺序不作保证。
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}{}", self.method, self.target(), self.version, CRLF);
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}{}", name, value, CRLF));
        }
        out.push_str(CRLF);
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// 路径加上重新编码的查询字符串
    pub fn target(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query.encode())
        }
    }
}

/// 返回 `\r\n\r\n` 的起始下标
pub fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

/// 头部已完整时，返回整个请求应有的字节数（头部 + `content-length` 正文）
pub fn expected_length(buffer: &[u8]) -> Option<usize> {
    let split = find_header_end(buffer)?;
    let head = String::from_utf8_lossy(&buffer[..split]);
    let body_len = head
        .split(CRLF)
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .filter(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .filter_map(|(_, value)| value.trim().parse::<usize>().ok())
        .last()
        .unwrap_or(0);
    Some(split + HEADER_TERMINATOR.len() + body_len)
}

/// 拆分请求目标为 (路径, 原始查询字符串)，兼容 absolute-form 并丢弃片段
fn split_target(target: &str) -> (String, String) {
    let target = target.split('#').next().unwrap_or_default();
    let origin = match target.find("://") {
        Some(pos) if target[..pos].chars().all(|c| c.is_ascii_alphabetic()) => {
            let rest = &target[pos + 3..];
            match rest.find(['/', '?']) {
                Some(i) if rest[i..].starts_with('?') => format!("/{}", &rest[i..]),
                Some(i) => rest[i..].to_string(),
                None => "/".to_string(),
            }
        }
        _ => target.to_string(),
    };
    match origin.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (origin, String::new()),
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c))
}

// --- Getter 访问器实现 ---

impl Request {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// 获取请求路径（不含查询参数）
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// 按名称（大小写不敏感）获取标头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// 获取客户端支持的压缩算法列表
    pub fn accept_encoding(&self) -> Vec<HttpEncoding> {
        let Some(value) = self.header("accept-encoding") else {
            return Vec::new();
        };
        value
            .split(',')
            .filter_map(|item| match item.split(';').next().unwrap_or_default().trim() {
                "gzip" => Some(HttpEncoding::Gzip),
                "deflate" => Some(HttpEncoding::Deflate),
                "br" => Some(HttpEncoding::Br),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// 验证常规 GET 请求的解析，包括 Path 和 Headers
    #[test]
    fn test_parse_get_request() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost:8000\r\nUser-Agent: Test-Browser\r\nAccept-Encoding: gzip, deflate, br\r\n\r\n";
        let request = Request::try_from(raw, 0).unwrap();

        assert_eq!(request.method(), "GET");
        assert_eq!(request.path(), "/");
        assert_eq!(request.version(), "HTTP/1.1");
        assert_eq!(request.header("User-Agent"), Some("Test-Browser"));
        assert_eq!(
            request.accept_encoding(),
            vec![HttpEncoding::Gzip, HttpEncoding::Deflate, HttpEncoding::Br]
        );
    }

    /// POST 正文按原样保留
    #[test]
    fn test_parse_post_body() {
        let raw = b"POST /submit HTTP/1.1\r\nHost: localhost\r\nContent-Length: 10\r\n\r\ntest=value";
        let request = Request::parse(raw);

        assert_eq!(request.method(), "POST");
        assert_eq!(request.body().as_ref(), b"test=value");
    }

    /// 查询字符串与路径分离，多值按顺序保留
    #[test]
    fn test_query_multimap() {
        let raw = b"GET /page?id=123&tag=a&tag=b&name=hello+world HTTP/1.1\r\n\r\n";
        let request = Request::parse(raw);

        assert_eq!(request.path(), "/page");
        assert_eq!(request.query().get("id"), Some(&["123".to_string()][..]));
        assert_eq!(
            request.query().get("tag"),
            Some(&["a".to_string(), "b".to_string()][..])
        );
        assert_eq!(request.query().get("name").unwrap()[0], "hello world");
        assert_eq!(request.target(), "/page?id=123&tag=a&tag=b&name=hello+world");
    }

    /// 名称小写化，重复标头以最后一次为准
    #[test]
    fn test_header_last_write_wins() {
        let raw = b"GET / HTTP/1.1\r\nX-Token: first\r\nx-token: second\r\n\r\n";
        let request = Request::parse(raw);
        assert_eq!(request.header("x-token"), Some("second"));
        assert_eq!(request.headers().len(), 1);
    }

    /// 缺少 `": "` 分隔符的行被跳过而不是导致失败
    #[test]
    fn test_malformed_header_line_skipped() {
        let raw = b"GET / HTTP/1.1\r\nHost:nospace\r\ngarbage\r\nAccept: */*\r\n\r\n";
        let request = Request::parse(raw);
        assert!(request.is_valid());
        assert_eq!(request.header("host"), None);
        assert_eq!(request.header("accept"), Some("*/*"));
    }

    /// 没有空行结束的头部视为无效请求
    #[test]
    fn test_missing_terminator_is_invalid() {
        let request = Request::parse(b"GET / HTTP/1.1\r\nHost: x");
        assert!(!request.is_valid());
        assert!(matches!(
            Request::try_from(b"GET / HTTP/1.1", 1),
            Err(Exception::MalformedRequest)
        ));
    }

    #[test]
    fn test_unparsable_request_line() {
        for raw in [
            &b"\r\n\r\n"[..],
            b"GET\r\n\r\n",
            b"GET relative HTTP/1.1\r\n\r\n",
            b"G(T / HTTP/1.1\r\n\r\n",
            b"GET / HTTP/1.1 extra\r\n\r\n",
        ] {
            assert!(!Request::parse(raw).is_valid(), "{:?}", raw);
        }
    }

    /// 非 UTF-8 字节按有损方式解码，不会导致崩溃
    #[test]
    fn test_invalid_utf8_header() {
        let mut raw = b"GET /x HTTP/1.1\r\nX-Bin: ".to_vec();
        raw.extend_from_slice(&[0xFF, 0xFE]);
        raw.extend_from_slice(b"\r\n\r\n");
        let request = Request::parse(&raw);
        assert!(request.is_valid());
        assert!(request.header("x-bin").is_some());
    }

    /// absolute-form 请求目标只保留路径与查询
    #[test]
    fn test_absolute_form_target() {
        let request = Request::parse(b"GET http://example.com/a/b?c=d#frag HTTP/1.1\r\n\r\n");
        assert_eq!(request.path(), "/a/b");
        assert_eq!(request.query().get("c").unwrap()[0], "d");

        let request = Request::parse(b"GET http://example.com HTTP/1.1\r\n\r\n");
        assert_eq!(request.path(), "/");
    }

    /// 缺省版本号按 HTTP/1.1 处理
    #[test]
    fn test_missing_version_defaults() {
        let request = Request::parse(b"GET /legacy\r\n\r\n");
        assert!(request.is_valid());
        assert_eq!(request.version(), "HTTP/1.1");
    }

    #[test]
    fn test_expected_length() {
        assert_eq!(expected_length(b"GET / HTTP/1.1\r\n"), None);
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nab";
        assert_eq!(expected_length(raw), Some(raw.len() - 2 + 5));
        assert_eq!(expected_length(b"GET / HTTP/1.1\r\n\r\n"), Some(18));
    }

    /// 序列化后再解析，方法、路径与标头集合保持不变
    #[test]
    fn test_serialize_round_trip() {
        let raw = b"PUT /items/7?force=1 HTTP/1.1\r\nHost: a\r\nX-Custom: 42\r\nContent-Length: 3\r\n\r\nabc";
        let first = Request::parse(raw);
        let second = Request::parse(&first.as_bytes());
        assert_eq!(first.method(), second.method());
        assert_eq!(first.path(), second.path());
        assert_eq!(first.query(), second.query());
        assert_eq!(first.headers(), second.headers());
        assert_eq!(first.body(), second.body());
    }

    proptest! {
        /// 任意字节输入都不会让解析器崩溃
        #[test]
        fn prop_parse_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let request = Request::parse(&bytes);
            if find_header_end(&bytes).is_none() {
                prop_assert!(!request.is_valid());
            }
        }

        /// 合法请求经序列化往返后方法、路径与标头不变
        #[test]
        fn prop_round_trip(
            method in "[A-Z]{3,7}",
            path in "/[a-z0-9/._-]{0,24}",
            headers in proptest::collection::hash_map("[a-z][a-z0-9-]{0,12}", "[ -~]{0,20}", 0..6),
        ) {
            let mut raw = format!("{} {} HTTP/1.1\r\n", method, path);
            for (name, value) in &headers {
                raw.push_str(&format!("{}: {}\r\n", name, value.trim()));
            }
            raw.push_str("\r\n");
            let first = Request::parse(raw.as_bytes());
            prop_assert!(first.is_valid());
            let second = Request::parse(&first.as_bytes());
            prop_assert_eq!(first.method(), second.method());
            prop_assert_eq!(first.path(), second.path());
            prop_assert_eq!(first.headers(), second.headers());
        }
    }
}

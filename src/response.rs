// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 响应模块
//!
//! `Response` 由某一个处理器构造一次、序列化一次后丢弃。构造时补齐三项默认头部：
//! `content-length`（按正文长度）、`content-type`（`text/html; charset=utf-8`）与 `server`。
//! 头部名称大小写不敏感，序列化时保持插入顺序。

use bytes::Bytes;
use chrono::prelude::*;
use log::error;

use crate::{exception::Exception, param::*};

/// 大小写不敏感、保持插入顺序的头部列表。允许同名头部重复出现（如 `set-cookie`）。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderList(Vec<(String, String)>);

impl HeaderList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// 第一个同名头部的取值
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 追加一个头部，不影响已有的同名头部
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// 设置头部：替换第一个同名头部的位置并删除其余同名项，不存在时追加
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter().position(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(index) => {
                self.0[index] = (name.clone(), value);
                let mut seen = 0;
                self.0.retain(|(n, _)| {
                    if n.eq_ignore_ascii_case(&name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.0.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderList {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: &'static str,
    headers: HeaderList,
    content: Bytes,
}

impl Response {
    /// 构造响应。状态码不在 100-599 之间时构造失败。
    pub fn new(
        status_code: u16,
        headers: HeaderList,
        body: impl Into<Bytes>,
    ) -> Result<Self, Exception> {
        let information =
            reason_phrase(status_code).ok_or(Exception::UnknownStatusCode(status_code))?;
        Ok(Self::assemble(status_code, information, headers, body.into()))
    }

    fn assemble(status_code: u16, information: &'static str, mut headers: HeaderList, content: Bytes) -> Self {
        if !headers.contains("content-length") {
            headers.set("content-length", content.len().to_string());
        }
        if !headers.contains("content-type") {
            headers.set("content-type", "text/html; charset=utf-8");
        }
        if !headers.contains("server") {
            headers.set("server", server_ident());
        }
        if !headers.contains("date") {
            headers.set("date", format_date(&Utc::now()));
        }
        Self {
            version: HttpVersion::V1_1,
            status_code,
            information,
            headers,
            content,
        }
    }

    /// 以 HTML 正文构造响应。未知状态码会记录错误并降级为 500。
    pub fn html(status_code: u16, body: impl Into<Bytes>) -> Self {
        Self::with_headers(status_code, HeaderList::new(), body)
    }

    /// 与 [`Response::new`] 相同，但永不失败
    pub fn with_headers(status_code: u16, headers: HeaderList, body: impl Into<Bytes>) -> Self {
        match reason_phrase(status_code) {
            Some(information) => Self::assemble(status_code, information, headers, body.into()),
            None => {
                error!("非法的状态码：{}，降级为500", status_code);
                Self::assemble(500, "Internal Server Error", HeaderList::new(), Bytes::new())
            }
        }
    }

    /// 纯文本响应
    pub fn plain(status_code: u16, body: impl Into<String>) -> Self {
        let headers = [("content-type", "text/plain; charset=utf-8")]
            .into_iter()
            .collect();
        Self::with_headers(status_code, headers, body.into())
    }

    /// 覆盖单个头部，用于路由级的 `cache-control` 等设置
    /// 状态行使用的协议版本，默认 HTTP/1.1
    pub fn set_version(&mut self, version: HttpVersion) {
        self.version = version;
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// 序列化为 `<version> <code> <reason>\r\n` + 头部 + 空行 + 正文
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "{} {} {}{}",
            self.version, self.status_code, self.information, CRLF
        );
        for (name, value) in self.headers.iter() {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str(CRLF);
        }
        head.push_str(CRLF);
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.content);
        bytes
    }
}

/// RFC 9110 规定的 IMF-fixdate 格式
fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        self.information
    }

    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }
}

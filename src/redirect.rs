// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 精确路径重定向。

use std::collections::HashMap;

use crate::request::Request;
use crate::response::{HeaderList, Response};

#[derive(Debug, Clone, Default)]
pub struct RedirectHandler {
    redirections: HashMap<String, String>,
    permanent: bool,
}

impl RedirectHandler {
    /// 由有序的 (路径, 目标) 列表构造，重复路径以后出现者为准
    pub fn new(entries: Vec<(String, String)>, permanent: bool) -> Self {
        Self {
            redirections: entries.into_iter().collect(),
            permanent,
        }
    }

    /// 路径是否存在精确匹配
    pub fn target(&self, path: &str) -> Option<&str> {
        self.redirections.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.redirections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.redirections.is_empty()
    }

    /// 生成 301/302 响应，原始查询字符串附加到目标地址之后
    pub fn handle(&self, request: &Request) -> Option<Response> {
        let target = self.target(request.path())?;
        let mut location = target.to_string();
        if !request.query().is_empty() {
            location.push(if location.contains('?') { '&' } else { '?' });
            location.push_str(&request.query().encode());
        }
        let code = if self.permanent { 301 } else { 302 };
        let headers: HeaderList = [("Location", location)].into_iter().collect();
        Some(Response::with_headers(code, headers, ""))
    }
}

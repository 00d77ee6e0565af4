// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 内置 HTML 页面生成：欢迎页与错误页的最终兜底版本。

use crate::param::WELCOME_MARKER;

pub struct HtmlBuilder {
    title: String,
    css: String,
    body: String,
}

const BASE_CSS: &str = r"
            body {
                width: 40em;
                margin: 40px auto;
                font-family: Tahoma, Verdana, Arial, sans-serif;
                line-height: 1.6;
            }
            h1 { color: #2c3e50; }
            .info { background-color: #f8f9fa; padding: 20px; border-radius: 5px; }
            ";

impl HtmlBuilder {
    /// 带详细说明的错误页
    pub fn from_error(code: u16, status_text: &str, details: &str) -> Self {
        let body = format!(
            r#"
            <h1>{} - {}</h1>
            <p>{}</p>
            <p><a href="/">Return to home page</a></p>
            "#,
            code,
            escape_html(status_text),
            escape_html(details)
        );
        Self {
            title: format!("{} - {}", code, escape_html(status_text)),
            css: BASE_CSS.to_string(),
            body,
        }
    }

    /// 根路径的欢迎页
    pub fn welcome(tls: bool) -> Self {
        let scheme = if tls { "HTTPS" } else { "HTTP" };
        let body = format!(
            r#"
            <h1>{}</h1>
            <div class="info">
                <p>Your {} server is running successfully.</p>
                <p>You can place static files in the <code>static</code> directory.</p>
                <p>Reverse proxy targets and redirects are configured in <code>config/development.toml</code>.</p>
            </div>
            "#,
            WELCOME_MARKER, scheme
        );
        Self {
            title: "webgate - Welcome".to_string(),
            css: BASE_CSS.to_string(),
            body,
        }
    }

    pub fn build(&self) -> String {
        format!(
            r##"<!DOCTYPE html>
<html>
    <head>
        <meta charset="utf-8">
        <title>{}</title>
        <style>{}</style>
    </head>
    <body>
    {}
    </body>
</html>"##,
            self.title, self.css, self.body
        )
    }
}

/// 转义 HTML 特殊字符
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn format_file_size(size: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < units.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.1} {}", size, units[unit_index])
}

// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 模板与错误页模块
//!
//! 错误页的渲染链固定为三级，不做递归：
//! 1. `error_<code>.html`
//! 2. `errors.html`
//! 3. 内置的 [`HtmlBuilder`] 页面
//!
//! 模板语法只有 `{{key}}` 占位符替换，模板文本读取后缓存在内存中。

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use log::{debug, warn};

use crate::exception::Exception;
use crate::util::{escape_html, HtmlBuilder};

/// 根据 `(状态码, 状态文本, 详情)` 生成 HTML 错误页的协作者
#[cfg_attr(test, mockall::automock)]
pub trait ErrorPageRenderer: Send + Sync {
    fn render_error(
        &self,
        status_code: u16,
        status_text: &str,
        error_details: &str,
    ) -> Result<String, Exception>;
}

pub struct TemplateEngine {
    templates_dir: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl TemplateEngine {
    pub fn new(templates_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// 将 `{{key}}` 替换为上下文中的值
    pub fn render_string(template: &str, context: &[(&str, &str)]) -> String {
        context.iter().fold(template.to_string(), |text, (key, value)| {
            text.replace(&format!("{{{{{}}}}}", key), value)
        })
    }

    /// 加载并渲染模板文件，文件不存在时返回 `TemplateNotFound`
    pub fn render_template(&self, name: &str, context: &[(&str, &str)]) -> Result<String, Exception> {
        let template = self.load(name)?;
        Ok(Self::render_string(&template, context))
    }

    fn load(&self, name: &str) -> Result<String, Exception> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(text) = cache.get(name) {
                return Ok(text.clone());
            }
        }
        let path = self.templates_dir.join(name);
        let text = fs::read_to_string(&path)
            .map_err(|_| Exception::TemplateNotFound(path.display().to_string()))?;
        debug!("加载模板 {}", path.display());
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(name.to_string(), text.clone());
        }
        Ok(text)
    }

    /// 配置重载时清空模板缓存
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}

impl ErrorPageRenderer for TemplateEngine {
    fn render_error(
        &self,
        status_code: u16,
        status_text: &str,
        error_details: &str,
    ) -> Result<String, Exception> {
        let code = status_code.to_string();
        let text = escape_html(status_text);
        let details = escape_html(error_details);
        let context = [
            ("status_code", code.as_str()),
            ("status_text", text.as_str()),
            ("error_details", details.as_str()),
        ];
        self.render_template(&format!("error_{}.html", status_code), &context)
            .or_else(|_| self.render_template("errors.html", &context))
    }
}

/// 渲染错误页，渲染器缺失或失败时回退到内置页面，保证总能得到正文
pub fn render_error_page(
    renderer: Option<&dyn ErrorPageRenderer>,
    status_code: u16,
    status_text: &str,
    error_details: &str,
) -> String {
    if let Some(renderer) = renderer {
        match renderer.render_error(status_code, status_text, error_details) {
            Ok(html) => return html,
            Err(e) => warn!("错误页模板渲染失败，使用内置页面：{}", e),
        }
    }
    HtmlBuilder::from_error(status_code, status_text, error_details).build()
}

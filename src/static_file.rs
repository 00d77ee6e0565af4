// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 静态文件模块
//!
//! 负责 `/static/` 前缀请求、静态根目录下的直接命中以及路由扩展中 `root` 目录的文件读取：
//! - 路径在词法层面归一化，任何越出根目录的尝试返回 403；符号链接再按规范路径复查一次。
//! - 根据后缀确定 MIME 类型，并按 `Accept-Encoding` 协商压缩。
//! - 文件内容经 LRU 缓存，修改时间变化即失效。

use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use brotli::enc::{self, backward_references::BrotliEncoderParams};
use bytes::Bytes;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, warn};

use crate::cache::FileCache;
use crate::exception::Exception;
use crate::param::{mime_for_extension, HttpEncoding, STATIC_CACHE_CONTROL};
use crate::request::Request;
use crate::response::{HeaderList, Response};
use crate::util::format_file_size;

pub struct StaticFileHandler {
    static_dir: PathBuf,
    cache: Mutex<FileCache>,
}

impl StaticFileHandler {
    pub fn new(static_dir: impl AsRef<Path>, cache_size: usize, cache_threshold: u64) -> Self {
        Self {
            static_dir: canonical_or_absolute(static_dir.as_ref()),
            cache: Mutex::new(FileCache::from_capacity(cache_size, cache_threshold)),
        }
    }

    pub fn static_dir(&self) -> &Path {
        &self.static_dir
    }

    /// 处理 `/static/` 前缀的请求
    pub async fn handle(&self, request: &Request) -> Result<Response, Exception> {
        let relative = request
            .path()
            .strip_prefix("/static/")
            .unwrap_or(request.path());
        self.serve_from(&self.static_dir, relative, request).await
    }

    /// 请求路径是否直接对应静态根目录下的一个普通文件
    pub fn direct_hit(&self, path: &str) -> Option<PathBuf> {
        let candidate = resolve_under(&self.static_dir, path).ok()?;
        candidate.is_file().then_some(candidate)
    }

    /// 从任意根目录读取相对路径对应的文件
    pub async fn serve_from(
        &self,
        root: &Path,
        relative: &str,
        request: &Request,
    ) -> Result<Response, Exception> {
        let path = match resolve_under(root, relative) {
            Ok(p) => p,
            Err(e) => {
                warn!("拒绝目录遍历尝试：{}", request.path());
                return Err(e);
            }
        };
        let root = canonical_or_absolute(root);
        self.serve_path(&root, &path, request).await
    }

    /// 读取单个文件并构造响应。`root` 为规范化后的根目录，用于符号链接复查。
    pub async fn serve_path(
        &self,
        root: &Path,
        path: &Path,
        request: &Request,
    ) -> Result<Response, Exception> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(_) => {
                warn!("文件不存在：{}", path.display());
                return Err(Exception::FileNotFound);
            }
        };
        if !metadata.is_file() {
            return Err(Exception::Forbidden);
        }
        let canonical = tokio::fs::canonicalize(path).await?;
        if !canonical.starts_with(root) {
            warn!("符号链接指向根目录之外：{}", path.display());
            return Err(Exception::Forbidden);
        }

        let modified = metadata.modified()?;
        let cached = self
            .cache
            .lock()
            .ok()
            .and_then(|mut cache| cache.find(&canonical, modified));
        let content = match cached {
            Some(bytes) => {
                debug!("缓存命中：{}", canonical.display());
                bytes
            }
            None => {
                let bytes = Bytes::from(tokio::fs::read(&canonical).await?);
                if let Ok(mut cache) = self.cache.lock() {
                    cache.push(&canonical, bytes.clone(), modified);
                }
                bytes
            }
        };

        let extension = canonical
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let mime = mime_for_extension(extension);
        debug!(
            "发送静态文件 {} ({}, {})",
            canonical.display(),
            mime,
            format_file_size(content.len() as u64)
        );

        let mut headers = HeaderList::new();
        headers.set("content-type", mime);
        headers.set("cache-control", STATIC_CACHE_CONTROL);
        let body = match decide_encoding(&request.accept_encoding()) {
            Some(encoding) if !should_skip_compression(mime) && !content.is_empty() => {
                match compress(&content, encoding) {
                    Ok(compressed) => {
                        headers.set("content-encoding", encoding.to_string());
                        headers.set("vary", "accept-encoding");
                        Bytes::from(compressed)
                    }
                    Err(e) => {
                        warn!("压缩失败，发送原始内容：{}", e);
                        content
                    }
                }
            }
            _ => content,
        };
        Ok(Response::with_headers(200, headers, body))
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}

/// 在词法层面把相对路径拼接到根目录下，`..` 越出根目录时返回 `Forbidden`
pub fn resolve_under(root: &Path, relative: &str) -> Result<PathBuf, Exception> {
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::ParentDir => {
                if depth == 0 {
                    return Err(Exception::Forbidden);
                }
                resolved.pop();
                depth -= 1;
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Ok(resolved)
}

fn canonical_or_absolute(path: &Path) -> PathBuf {
    match std::fs::canonicalize(path) {
        Ok(p) => p,
        Err(_) => std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
    }
}

fn compress(data: &[u8], encoding: HttpEncoding) -> io::Result<Vec<u8>> {
    let result = match encoding {
        HttpEncoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
        HttpEncoding::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
        HttpEncoding::Br => {
            let params = BrotliEncoderParams::default();
            let mut output = Vec::new();
            enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
    };
    if let Ok(ref compressed) = result {
        debug!(
            "压缩完成: {}, 原始大小: {} bytes, 压缩后: {} bytes",
            encoding,
            data.len(),
            compressed.len()
        );
    }
    result
}

fn should_skip_compression(mime_type: &str) -> bool {
    const SKIP: [&str; 9] = [
        "image/",
        "video/",
        "audio/",
        "font/woff",
        "application/zip",
        "application/gzip",
        "application/wasm",
        "application/octet-stream",
        "application/pdf",
    ];
    // svg 是文本，仍然值得压缩
    if mime_type.starts_with("image/svg") {
        return false;
    }
    SKIP.iter().any(|skip| mime_type.starts_with(skip))
}

/// 优先级：gzip > br > deflate
fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    [HttpEncoding::Gzip, HttpEncoding::Br, HttpEncoding::Deflate]
        .into_iter()
        .find(|e| accept_encoding.contains(e))
}

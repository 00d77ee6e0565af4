// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 静态文件内容的 LRU 缓存，以规范化路径为键，修改时间变化即失效。

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use lru::LruCache;

struct CacheEntry {
    content: Bytes,
    modified_time: SystemTime,
}

pub struct FileCache {
    cache: LruCache<PathBuf, CacheEntry>,
    /// 超过该大小的文件不进入缓存
    threshold: u64,
}

impl FileCache {
    /// 容量为 0 时按 1 处理
    pub fn from_capacity(capacity: usize, threshold: u64) -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            threshold,
        }
    }

    pub fn push(&mut self, path: &Path, content: Bytes, modified_time: SystemTime) {
        if !self.should_cache(content.len() as u64) {
            return;
        }
        let entry = CacheEntry {
            content,
            modified_time,
        };
        self.cache.put(path.to_path_buf(), entry);
    }

    pub fn should_cache(&self, file_size: u64) -> bool {
        file_size <= self.threshold
    }

    /// 查询有效缓存；修改时间不一致的旧条目会被移除
    pub fn find(&mut self, path: &Path, current_modified_time: SystemTime) -> Option<Bytes> {
        let stale = match self.cache.get(path) {
            Some(entry) if entry.modified_time == current_modified_time => {
                return Some(entry.content.clone())
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            self.cache.pop(path);
        }
        None
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

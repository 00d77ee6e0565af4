// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由表模块
//!
//! 仿照 nginx 的 location 优先级，将配置中的模式在加载期编译为有序的匹配器：
//!
//! | 语法 | 类型 | 优先级 |
//! |---|---|---|
//! | `=/path` | 精确匹配 | 1 |
//! | `~regex` / `~*regex` | 正则（区分 / 不区分大小写） | 2 |
//! | `^~/prefix` | 非正则前缀 | 3 |
//! | 其他 | 普通前缀 | 4 |
//! | `__default__` | SPA 回退 | 999 |
//!
//! 同优先级按声明顺序匹配。非法正则在编译期报错，永远不会在请求期出现。

use std::collections::HashMap;
use std::path::PathBuf;

use regex::{Regex, RegexBuilder};
use serde::Deserialize as _;
use serde_derive::Deserialize;

use crate::exception::Exception;
use crate::param::DEFAULT_SPA_EXCLUDES;

pub const SPA_PATTERN: &str = "__default__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Exact,
    Regex,
    RegexCaseInsensitive,
    PrefixNoRegex,
    Prefix,
    SpaFallback,
}

impl PatternKind {
    /// 根据模式前缀判断类型，返回 (类型, 去掉前缀后的模式体)
    pub fn classify(pattern: &str) -> (Self, &str) {
        if let Some(rest) = pattern.strip_prefix('=') {
            (PatternKind::Exact, rest)
        } else if let Some(rest) = pattern.strip_prefix("~*") {
            (PatternKind::RegexCaseInsensitive, rest)
        } else if let Some(rest) = pattern.strip_prefix('~') {
            (PatternKind::Regex, rest)
        } else if let Some(rest) = pattern.strip_prefix("^~") {
            (PatternKind::PrefixNoRegex, rest)
        } else if pattern == SPA_PATTERN {
            (PatternKind::SpaFallback, "")
        } else {
            (PatternKind::Prefix, pattern)
        }
    }

    /// 数值越小越先匹配
    pub fn priority(&self) -> u32 {
        match self {
            PatternKind::Exact => 1,
            PatternKind::Regex | PatternKind::RegexCaseInsensitive => 2,
            PatternKind::PrefixNoRegex => 3,
            PatternKind::Prefix => 4,
            PatternKind::SpaFallback => 999,
        }
    }
}

fn default_index() -> String {
    "index.html".to_string()
}

/// 路由条目携带的配置。未识别的键保存在 `extra` 中。
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RouteConfig {
    pub proxy_pass: Option<String>,
    pub root: Option<PathBuf>,
    #[serde(default = "default_index")]
    pub index_file: String,
    #[serde(default)]
    pub spa_fallback: bool,
    pub exclude_patterns: Option<Vec<String>>,
    pub cache_control: Option<String>,
    #[serde(flatten)]
    pub extra: toml::Table,
}

#[derive(Debug)]
enum Matcher {
    Regex(Regex),
    Literal(String),
    Fallback,
}

#[derive(Debug)]
pub struct RouteEntry {
    pattern: String,
    kind: PatternKind,
    matcher: Matcher,
    priority: u32,
    config: RouteConfig,
}

impl RouteEntry {
    fn compile(pattern: &str, value: &toml::Value) -> Result<Self, Exception> {
        let invalid = |reason: String| Exception::InvalidRoutePattern {
            pattern: pattern.to_string(),
            reason,
        };
        let config = RouteConfig::deserialize(value.clone()).map_err(|e| invalid(e.to_string()))?;
        let (kind, body) = PatternKind::classify(pattern);
        let matcher = match kind {
            PatternKind::Regex | PatternKind::RegexCaseInsensitive => {
                let regex = RegexBuilder::new(body)
                    .case_insensitive(kind == PatternKind::RegexCaseInsensitive)
                    .build()
                    .map_err(|e| invalid(e.to_string()))?;
                Matcher::Regex(regex)
            }
            PatternKind::SpaFallback => Matcher::Fallback,
            _ => Matcher::Literal(body.to_string()),
        };

        if let Some(target) = &config.proxy_pass {
            let parsed = url::Url::parse(target).map_err(|e| invalid(format!("proxy_pass: {}", e)))?;
            if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                return Err(invalid(format!("invalid proxy_pass '{}'", target)));
            }
        }
        if kind == PatternKind::SpaFallback && config.spa_fallback && config.root.is_none() {
            return Err(invalid("SPA fallback requires 'root'".to_string()));
        }

        Ok(Self {
            pattern: pattern.to_string(),
            kind,
            matcher,
            priority: kind.priority(),
            config,
        })
    }

    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        match &self.matcher {
            Matcher::Regex(regex) => {
                let captures = regex.captures(path)?;
                Some(
                    regex
                        .capture_names()
                        .flatten()
                        .filter_map(|name| {
                            captures
                                .name(name)
                                .map(|m| (name.to_string(), m.as_str().to_string()))
                        })
                        .collect(),
                )
            }
            Matcher::Literal(literal) => {
                let hit = match self.kind {
                    PatternKind::Exact => path == literal,
                    _ => path.starts_with(literal.as_str()),
                };
                hit.then(HashMap::new)
            }
            Matcher::Fallback => None,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn config(&self) -> &RouteConfig {
        &self.config
    }
}

/// 一次成功匹配：命中的条目与命名捕获组参数
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub entry: &'a RouteEntry,
    pub params: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct RoutingTable {
    /// 已按 (优先级, 声明顺序) 排序，不含 SPA 回退
    entries: Vec<RouteEntry>,
    spa: Option<RouteEntry>,
}

impl RoutingTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// 按声明顺序编译全部模式，任何一个非法都会使整体失败
    pub fn compile(patterns: &toml::Table) -> Result<Self, Exception> {
        let mut entries = Vec::with_capacity(patterns.len());
        let mut spa = None;
        for (pattern, value) in patterns {
            let entry = RouteEntry::compile(pattern, value)?;
            if entry.kind == PatternKind::SpaFallback {
                if entry.config.spa_fallback {
                    spa = Some(entry);
                }
            } else {
                entries.push(entry);
            }
        }
        // 稳定排序保证同优先级维持声明顺序
        entries.sort_by_key(|entry| entry.priority);
        Ok(Self { entries, spa })
    }

    pub fn match_path(&self, path: &str) -> Option<RouteMatch<'_>> {
        for entry in &self.entries {
            if let Some(params) = entry.matches(path) {
                return Some(RouteMatch { entry, params });
            }
        }
        let spa = self.spa.as_ref()?;
        is_spa_route(spa, path).then(|| RouteMatch {
            entry: spa,
            params: HashMap::new(),
        })
    }

    /// 条目数（含 SPA 回退）
    pub fn len(&self) -> usize {
        self.entries.len() + usize::from(self.spa.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 最后一段不含扩展名，且不以任何排除前缀开头
fn is_spa_route(spa: &RouteEntry, path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or_default();
    if last.contains('.') {
        return false;
    }
    match &spa.config.exclude_patterns {
        Some(prefixes) => !prefixes.iter().any(|p| path.starts_with(p.as_str())),
        None => !DEFAULT_SPA_EXCLUDES.iter().any(|p| path.starts_with(p)),
    }
}

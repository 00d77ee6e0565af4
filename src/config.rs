// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 配置模块
//!
//! 从 TOML 文件加载服务器配置，叠加环境变量覆盖，并在启动 / 重载时做一次完整校验。
//! 校验失败的配置永远不会进入请求处理阶段。

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::warn;
use serde_derive::{Deserialize, Serialize};

use crate::exception::Exception;
use crate::routing::RoutingTable;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    http: HttpConfig,
    #[serde(default)]
    ssl: SslConfig,
    #[serde(default)]
    proxy: ProxyTimeouts,
    #[serde(default)]
    routing: RoutingConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default)]
    pub worker_threads: usize,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_cache_threshold")]
    pub cache_threshold_bytes: u64,
    #[serde(default)]
    pub permanent_redirects: bool,
    #[serde(default)]
    pub debug: bool,
    /// 有序的单键映射列表：`{ "/home" = "/index.html" }`
    #[serde(default)]
    pub redirect_instructions: Vec<HashMap<String, String>>,
    #[serde(default)]
    pub locations: HashMap<String, LocationConfig>,
    #[serde(default)]
    pub reverse_proxy: Vec<ProxyTarget>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
    #[serde(default = "default_templates_dir")]
    pub templates_dir: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SslConfig {
    #[serde(default)]
    pub enabled: bool,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProxyTimeouts {
    #[serde(default = "default_proxy_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// WebSocket 中继允许的单帧最大负载，超出时以 1009 关闭会话
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RoutingConfig {
    /// 模式 → 路由配置，按声明顺序保存
    #[serde(default)]
    pub regex_locations: toml::Table,
}

/// 以路径为键的 location 配置块
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct LocationConfig {
    pub auth: Option<AuthSettings>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuthSettings {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// 反向代理目标。HTTP 代理与 WebSocket 代理共用。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProxyTarget {
    /// 需要从请求路径中剥离的挂载前缀
    #[serde(default = "default_mount")]
    pub path: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
}

impl ProxyTarget {
    pub fn scheme(&self) -> &'static str {
        if self.ssl {
            "https"
        } else {
            "http"
        }
    }

    /// 后端基地址，例如 `http://localhost:9001`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme(), self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_backlog() -> u32 {
    5
}

fn default_read_timeout() -> u64 {
    30
}

fn default_cache_size() -> usize {
    5
}

fn default_cache_threshold() -> u64 {
    1048576 // 1MB
}

fn default_static_dir() -> String {
    "./static".to_string()
}

fn default_templates_dir() -> String {
    "./templates".to_string()
}

fn default_proxy_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_mount() -> String {
    "/".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            worker_threads: 0,
            read_timeout_secs: default_read_timeout(),
            cache_size: default_cache_size(),
            cache_threshold_bytes: default_cache_threshold(),
            permanent_redirects: false,
            debug: false,
            redirect_instructions: Vec::new(),
            locations: HashMap::new(),
            reverse_proxy: Vec::new(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            static_dir: default_static_dir(),
            templates_dir: default_templates_dir(),
        }
    }
}

impl Default for ProxyTimeouts {
    fn default() -> Self {
        Self {
            timeout_secs: default_proxy_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// 环境变量覆盖项：变量名 → 作用的配置字段
const ENV_OVERRIDES: [&str; 7] = [
    "WEBGATE_HOST",
    "WEBGATE_PORT",
    "WEBGATE_STATIC_DIR",
    "WEBGATE_TEMPLATES_DIR",
    "WEBGATE_SSL_ENABLED",
    "WEBGATE_SSL_CERT",
    "WEBGATE_SSL_KEY",
];

impl Config {
    pub fn new() -> Self {
        Self {
            server: ServerConfig::default(),
            http: HttpConfig::default(),
            ssl: SslConfig::default(),
            proxy: ProxyTimeouts::default(),
            routing: RoutingConfig::default(),
        }
    }

    /// 读取 TOML 文件，叠加 `WEBGATE_*` 环境变量后校验。
    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let text = fs::read_to_string(filename)
            .map_err(|e| Exception::InvalidConfig(format!("cannot read {}: {}", filename, e)))?;
        let mut config = Self::parse(&text)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.finish()
    }

    /// 仅从文本解析并校验，不读取环境变量
    pub fn from_str(text: &str) -> Result<Self, Exception> {
        Self::parse(text)?.finish()
    }

    fn parse(text: &str) -> Result<Self, Exception> {
        toml::from_str(text).map_err(|e| Exception::InvalidConfig(e.to_string()))
    }

    fn finish(mut self) -> Result<Self, Exception> {
        if self.server.worker_threads == 0 {
            self.server.worker_threads = num_cpus::get();
        }
        if self.server.cache_size == 0 {
            warn!("cache_size被设置为0，但目前尚不支持禁用缓存，因此该值将被改为5。");
            self.server.cache_size = default_cache_size();
        }
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(Exception::InvalidConfig(errors.join("; ")))
        }
    }

    /// 按变量名查询覆盖值。无法解析的数值 / 布尔值会被忽略并记录警告。
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for name in ENV_OVERRIDES {
            let Some(value) = lookup(name) else {
                continue;
            };
            match name {
                "WEBGATE_HOST" => self.server.host = value,
                "WEBGATE_PORT" => match value.parse() {
                    Ok(port) => self.server.port = port,
                    Err(_) => warn!("忽略非法的 {}: {}", name, value),
                },
                "WEBGATE_STATIC_DIR" => self.http.static_dir = value,
                "WEBGATE_TEMPLATES_DIR" => self.http.templates_dir = value,
                "WEBGATE_SSL_ENABLED" => {
                    self.ssl.enabled = matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
                }
                "WEBGATE_SSL_CERT" => self.ssl.cert_file = Some(value),
                "WEBGATE_SSL_KEY" => self.ssl.key_file = Some(value),
                _ => {}
            }
        }
    }

    /// 收集全部校验错误，空列表表示配置可用。
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let server = &self.server;

        if server.port == 0 {
            errors.push("server.port must be between 1 and 65535".to_string());
        }
        if server.backlog == 0 {
            errors.push("server.backlog must be a positive integer".to_string());
        }
        if server.read_timeout_secs == 0 {
            errors.push("server.read_timeout_secs must be positive".to_string());
        }
        if self.proxy.max_frame_bytes == 0 {
            errors.push("proxy.max_frame_bytes must be positive".to_string());
        }
        for (i, entry) in server.redirect_instructions.iter().enumerate() {
            if entry.len() != 1 {
                errors.push(format!(
                    "redirect_instructions[{}] must have exactly one key-value pair",
                    i
                ));
            }
        }
        for (i, target) in server.reverse_proxy.iter().enumerate() {
            if target.host.is_empty() {
                errors.push(format!("reverse_proxy[{}] missing required field: host", i));
            }
            if target.port == 0 {
                errors.push(format!("reverse_proxy[{}] invalid port: 0", i));
            }
            if !is_literal_mount(&target.path) {
                errors.push(format!(
                    "reverse_proxy[{}] path '{}' must start with '/' and contain only unreserved characters",
                    i, target.path
                ));
            }
        }
        for (path, location) in &server.locations {
            if let Some(auth) = &location.auth {
                match auth.kind.as_deref() {
                    Some("basic") => {
                        if auth.username.is_none() || auth.password.is_none() {
                            errors.push(format!(
                                "locations.{}.auth requires username and password",
                                path
                            ));
                        }
                    }
                    Some(other) => errors.push(format!(
                        "locations.{}.auth has unsupported type '{}'",
                        path, other
                    )),
                    None => errors.push(format!("locations.{}.auth missing field: type", path)),
                }
            }
        }
        if self.ssl.enabled {
            for (field, file) in [("cert_file", &self.ssl.cert_file), ("key_file", &self.ssl.key_file)] {
                match file {
                    None => errors.push(format!("ssl.{} is required when SSL is enabled", field)),
                    Some(f) if !Path::new(f).is_file() => {
                        errors.push(format!("SSL file not found: {}", f))
                    }
                    Some(_) => {}
                }
            }
        }
        if self.proxy.connect_timeout_secs == 0 || self.proxy.timeout_secs == 0 {
            errors.push("proxy timeouts must be positive".to_string());
        }
        if let Err(e) = RoutingTable::compile(&self.routing.regex_locations) {
            errors.push(e.to_string());
        }
        errors
    }
}

/// 挂载前缀只允许 RFC 3986 非保留字符与 `/`，避免百分号编码带来的歧义
fn is_literal_mount(path: &str) -> bool {
    path.starts_with('/')
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~' | '/'))
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

// --- Getter 访问器实现 ---
impl Config {
    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    pub fn http(&self) -> &HttpConfig {
        &self.http
    }

    pub fn ssl(&self) -> &SslConfig {
        &self.ssl
    }

    pub fn proxy(&self) -> &ProxyTimeouts {
        &self.proxy
    }

    pub fn routing(&self) -> &RoutingConfig {
        &self.routing
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn reverse_proxy(&self) -> &[ProxyTarget] {
        &self.server.reverse_proxy
    }

    /// 展开为有序的 (路径, 目标) 列表，保持声明顺序
    pub fn redirections(&self) -> Vec<(String, String)> {
        self.server
            .redirect_instructions
            .iter()
            .flat_map(|entry| entry.iter().map(|(k, v)| (k.clone(), v.clone())))
            .collect()
    }

    pub fn locations(&self) -> &HashMap<String, LocationConfig> {
        &self.server.locations
    }

    /// 供测试与内嵌场景修改配置
    pub fn server_mut(&mut self) -> &mut ServerConfig {
        &mut self.server
    }

    pub fn http_mut(&mut self) -> &mut HttpConfig {
        &mut self.http
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[server]
host = "0.0.0.0"
port = 8080
backlog = 16

[[server.redirect_instructions]]
"/home" = "/index.html"

[[server.redirect_instructions]]
"/old" = "https://example.com/new"

[server.locations."/admin".auth]
type = "basic"
username = "admin"
password = "secret"

[[server.reverse_proxy]]
path = "/api"
host = "localhost"
port = 9001

[http]
static_dir = "./public"

[routing.regex_locations."~^/api/v(?P<version>\\d+)/"]
proxy_pass = "http://localhost:3001"
"#;

    /// 默认配置应当满足校验
    #[test]
    fn test_default_config_is_valid() {
        let config = Config::new();
        assert!(config.validate().is_empty());
        assert_eq!(config.server().read_timeout_secs, 30);
        assert_eq!(config.proxy().connect_timeout_secs, 10);
        assert_eq!(config.proxy().max_frame_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_max_frame_bytes() {
        let config = Config::from_str("[proxy]\nmax_frame_bytes = 4096\n").unwrap();
        assert_eq!(config.proxy().max_frame_bytes, 4096);
        assert_eq!(config.proxy().timeout_secs, 30);
        match Config::from_str("[proxy]\nmax_frame_bytes = 0\n") {
            Err(Exception::InvalidConfig(msg)) => assert!(msg.contains("max_frame_bytes")),
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_str(SAMPLE).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.server().backlog, 16);
        assert_eq!(config.http().static_dir, "./public");
        assert_eq!(config.http().templates_dir, "./templates");
        assert_eq!(config.reverse_proxy().len(), 1);
        assert!(!config.reverse_proxy()[0].ssl);
        assert_eq!(
            config.redirections(),
            vec![
                ("/home".to_string(), "/index.html".to_string()),
                ("/old".to_string(), "https://example.com/new".to_string()),
            ]
        );
        let auth = config.locations()["/admin"].auth.as_ref().unwrap();
        assert_eq!(auth.kind.as_deref(), Some("basic"));
        assert!(config.server().worker_threads > 0);
    }

    #[test]
    fn test_reject_percent_encoded_mount() {
        let text = r#"
[[server.reverse_proxy]]
path = "/caf%C3%A9"
host = "localhost"
port = 9001
"#;
        match Config::from_str(text) {
            Err(Exception::InvalidConfig(msg)) => assert!(msg.contains("unreserved")),
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_reject_unknown_auth_type() {
        let text = r#"
[server.locations."/private".auth]
type = "digest"
username = "u"
password = "p"
"#;
        assert!(Config::from_str(text).is_err());
    }

    #[test]
    fn test_reject_invalid_route_regex() {
        let text = r#"
[routing.regex_locations."~^/broken/(unclosed"]
root = "./static"
"#;
        match Config::from_str(text) {
            Err(Exception::InvalidConfig(msg)) => assert!(msg.contains("Invalid route pattern")),
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_reject_multi_key_redirect() {
        let text = r#"
[[server.redirect_instructions]]
"/a" = "/b"
"/c" = "/d"
"#;
        assert!(Config::from_str(text).is_err());
    }

    #[test]
    fn test_ssl_enabled_requires_files() {
        let text = r#"
[ssl]
enabled = true
cert_file = "/nonexistent/cert.pem"
"#;
        match Config::from_str(text) {
            Err(Exception::InvalidConfig(msg)) => {
                assert!(msg.contains("SSL file not found"));
                assert!(msg.contains("key_file"));
            }
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::new();
        let vars: HashMap<&str, &str> = [
            ("WEBGATE_PORT", "9999"),
            ("WEBGATE_STATIC_DIR", "/srv/www"),
            ("WEBGATE_SSL_ENABLED", "true"),
        ]
        .into_iter()
        .collect();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.server().port, 9999);
        assert_eq!(config.http().static_dir, "/srv/www");
        assert!(config.ssl().enabled);
    }

    #[test]
    fn test_env_override_bad_port_ignored() {
        let mut config = Config::new();
        config.apply_overrides(|name| (name == "WEBGATE_PORT").then(|| "http".to_string()));
        assert_eq!(config.server().port, 8000);
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Config::from_toml(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.reverse_proxy()[0].base_url(), "http://localhost:9001");
    }

    #[test]
    fn test_from_toml_missing_file() {
        assert!(matches!(
            Config::from_toml("/definitely/not/here.toml"),
            Err(Exception::InvalidConfig(_))
        ));
    }
}

// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求分发模块
//!
//! 对每个请求按固定顺序判定处理方式，第一个命中的状态产生响应：
//! 1. 请求语法无效 → 400
//! 2. 反向代理前缀（按配置顺序），WebSocket 升级交给 WebSocket 代理
//! 3. 精确重定向
//! 4. location 认证
//! 5. 路由扩展（正则 / 前缀 / SPA 回退）
//! 6. 根路径欢迎页
//! 7. 静态文件
//! 8. 404
//!
//! 可重载的部分（路由表、重定向、认证、代理目标）保存在 `RouteSnapshot` 中，
//! 重载时整体原子替换，读者不会看到半更新状态。

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use log::{error, info, warn};

use crate::auth::{authenticate_location, challenge};
use crate::config::{AuthSettings, Config, ProxyTarget};
use crate::exception::Exception;
use crate::param::reason_phrase;
use crate::proxy::{matches_mount, target_from_proxy_pass, ProxyHandler};
use crate::redirect::RedirectHandler;
use crate::request::Request;
use crate::response::Response;
use crate::routing::{PatternKind, RoutingTable};
use crate::static_file::StaticFileHandler;
use crate::template::{render_error_page, ErrorPageRenderer, TemplateEngine};
use crate::util::HtmlBuilder;
use crate::websocket::is_upgrade_request;
use crate::ws_proxy::WebSocketProxyHandler;

/// 分发判定结果，与具体的 I/O 解耦，便于单独测试
#[derive(Debug)]
pub enum RouteAction {
    BadRequest,
    Proxy(ProxyTarget),
    WebSocket(ProxyTarget),
    Redirect(Response),
    Unauthorized,
    /// 路由扩展命中的文件，`relative` 相对于 `root`
    RouteFile {
        root: PathBuf,
        relative: String,
        cache_control: Option<String>,
    },
    Welcome,
    StaticPrefix,
    StaticFile(PathBuf),
    NotFound,
}

impl RouteAction {
    fn name(&self) -> &'static str {
        match self {
            RouteAction::BadRequest => "bad-request",
            RouteAction::Proxy(_) => "proxy",
            RouteAction::WebSocket(_) => "websocket",
            RouteAction::Redirect(_) => "redirect",
            RouteAction::Unauthorized => "auth",
            RouteAction::RouteFile { .. } => "route",
            RouteAction::Welcome => "welcome",
            RouteAction::StaticPrefix | RouteAction::StaticFile(_) => "static",
            RouteAction::NotFound => "not-found",
        }
    }
}

/// 分发的最终产物：直接写回的响应，或需要接管连接的 WebSocket 升级
#[derive(Debug)]
pub enum Dispatch {
    Respond(Response),
    Upgrade(ProxyTarget),
}

/// 可热重载的只读路由状态
#[derive(Debug)]
pub struct RouteSnapshot {
    routing: RoutingTable,
    redirects: RedirectHandler,
    locations: HashMap<String, AuthSettings>,
    proxy_targets: Vec<ProxyTarget>,
    /// 为真时 5xx 错误页带出异常详情
    debug: bool,
}

impl RouteSnapshot {
    pub fn from_config(config: &Config) -> Result<Self, Exception> {
        let locations = config
            .locations()
            .iter()
            .filter_map(|(path, location)| location.auth.clone().map(|auth| (path.clone(), auth)))
            .collect();
        Ok(Self {
            routing: RoutingTable::compile(&config.routing().regex_locations)?,
            redirects: RedirectHandler::new(
                config.redirections(),
                config.server().permanent_redirects,
            ),
            locations,
            proxy_targets: config.reverse_proxy().to_vec(),
            debug: config.server().debug,
        })
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn redirects(&self) -> &RedirectHandler {
        &self.redirects
    }

    pub fn locations(&self) -> &HashMap<String, AuthSettings> {
        &self.locations
    }

    pub fn proxy_targets(&self) -> &[ProxyTarget] {
        &self.proxy_targets
    }
}

pub struct Dispatcher {
    snapshot: ArcSwap<RouteSnapshot>,
    static_files: StaticFileHandler,
    proxy: ProxyHandler,
    ws_proxy: WebSocketProxyHandler,
    templates: Arc<TemplateEngine>,
    renderer: Arc<dyn ErrorPageRenderer>,
    tls: bool,
}

impl Dispatcher {
    pub fn new(config: &Config) -> Result<Self, Exception> {
        let templates = Arc::new(TemplateEngine::new(&config.http().templates_dir));
        Ok(Self {
            snapshot: ArcSwap::from_pointee(RouteSnapshot::from_config(config)?),
            static_files: StaticFileHandler::new(
                &config.http().static_dir,
                config.server().cache_size,
                config.server().cache_threshold_bytes,
            ),
            proxy: ProxyHandler::new(config.proxy())?,
            ws_proxy: WebSocketProxyHandler::new(config.proxy())?,
            renderer: templates.clone(),
            templates,
            tls: config.ssl().enabled,
        })
    }

    /// 替换错误页渲染器
    pub fn with_renderer(mut self, renderer: Arc<dyn ErrorPageRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn ws_proxy(&self) -> &WebSocketProxyHandler {
        &self.ws_proxy
    }

    /// 当前路由快照
    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        self.snapshot.load_full()
    }

    /// 用新配置重建路由快照并原子替换。构建失败时保留旧快照。
    pub fn reload(&self, config: &Config) -> Result<(), Exception> {
        let snapshot = RouteSnapshot::from_config(config)?;
        info!(
            "路由已重载：{} 个代理目标，{} 条路由，{} 条重定向",
            snapshot.proxy_targets.len(),
            snapshot.routing.len(),
            snapshot.redirects.len()
        );
        self.snapshot.store(Arc::new(snapshot));
        self.templates.clear_cache();
        self.static_files.clear_cache();
        Ok(())
    }

    /// 按固定顺序判定请求的处理方式
    pub fn decide(&self, request: &Request) -> RouteAction {
        if !request.is_valid() {
            return RouteAction::BadRequest;
        }
        let snapshot = self.snapshot.load();
        let path = request.path();

        if let Some(target) = snapshot
            .proxy_targets
            .iter()
            .find(|target| matches_mount(path, target))
        {
            return if is_upgrade_request(request) {
                RouteAction::WebSocket(target.clone())
            } else {
                RouteAction::Proxy(target.clone())
            };
        }

        if let Some(response) = snapshot.redirects.handle(request) {
            return RouteAction::Redirect(response);
        }

        if let Some(settings) = snapshot.locations.get(path) {
            if !authenticate_location(settings, request) {
                return RouteAction::Unauthorized;
            }
        }

        if let Some(action) = route_action(&snapshot.routing, request) {
            return action;
        }

        if path == "/" {
            return RouteAction::Welcome;
        }
        if path.starts_with("/static/") {
            return RouteAction::StaticPrefix;
        }
        match self.static_files.direct_hit(path) {
            Some(file) => RouteAction::StaticFile(file),
            None => RouteAction::NotFound,
        }
    }

    /// 处理一个已解析的请求。除 WebSocket 升级外，所有结果都是一个完整的响应。
    pub async fn dispatch(&self, request: &Request, peer: SocketAddr, id: u128) -> Dispatch {
        let action = self.decide(request);
        info!(
            "[ID{}]{} {} 来自 {} => {}",
            id,
            request.method(),
            request.path(),
            peer,
            action.name()
        );

        let result = match action {
            RouteAction::BadRequest => Err(Exception::MalformedRequest),
            RouteAction::Proxy(target) => {
                info!("[ID{}]选择后端 {}", id, target.base_url());
                self.proxy.forward(request, &target, peer, self.tls, id).await
            }
            RouteAction::WebSocket(target) => {
                info!("[ID{}]WebSocket 后端 {}", id, target.base_url());
                return Dispatch::Upgrade(target);
            }
            RouteAction::Redirect(response) => Ok(response),
            RouteAction::Unauthorized => {
                warn!("[ID{}]认证失败：{}", id, request.path());
                Ok(challenge())
            }
            RouteAction::RouteFile {
                root,
                relative,
                cache_control,
            } => self
                .static_files
                .serve_from(&root, &relative, request)
                .await
                .map(|mut response| {
                    if let Some(value) = cache_control {
                        response.set_header("cache-control", value);
                    }
                    response
                }),
            RouteAction::Welcome => Ok(Response::html(200, HtmlBuilder::welcome(self.tls).build())),
            RouteAction::StaticPrefix => self.static_files.handle(request).await,
            RouteAction::StaticFile(file) => {
                self.static_files
                    .serve_path(self.static_files.static_dir(), &file, request)
                    .await
            }
            RouteAction::NotFound => Err(Exception::FileNotFound),
        };

        Dispatch::Respond(result.unwrap_or_else(|e| self.error_response(&e)))
    }

    /// 把异常渲染为错误页响应。非调试模式下 5xx 页面不带出异常详情（可能含后端地址）。
    pub fn error_response(&self, exception: &Exception) -> Response {
        let code = exception.status_code();
        if code >= 500 {
            error!("请求处理失败：{}", exception);
        }
        let text = reason_phrase(code).unwrap_or("Internal Server Error");
        let details = if code < 500 || self.snapshot.load().debug {
            exception.to_string()
        } else {
            text.to_string()
        };
        let body = render_error_page(Some(self.renderer.as_ref()), code, text, &details);
        Response::html(code, body)
    }
}

/// 路由扩展：`proxy_pass` 转发整条路径，`root` 按路径取文件，SPA 回退返回入口文档。
/// 既无 `proxy_pass` 也无 `root` 的条目不终止分发。
fn route_action(routing: &RoutingTable, request: &Request) -> Option<RouteAction> {
    if routing.is_empty() {
        return None;
    }
    let matched = routing.match_path(request.path())?;
    let config = matched.entry.config();

    if let Some(proxy_pass) = &config.proxy_pass {
        return match target_from_proxy_pass(proxy_pass) {
            Ok(target) if is_upgrade_request(request) => Some(RouteAction::WebSocket(target)),
            Ok(target) => Some(RouteAction::Proxy(target)),
            Err(e) => {
                error!("路由 {} 的 proxy_pass 无效：{}", matched.entry.pattern(), e);
                None
            }
        };
    }

    let root = config.root.clone()?;
    let relative = if matched.entry.kind() == PatternKind::SpaFallback {
        config.index_file.clone()
    } else if request.path().ends_with('/') {
        format!("{}{}", request.path(), config.index_file)
    } else {
        request.path().to_string()
    };
    Some(RouteAction::RouteFile {
        root,
        relative,
        cache_control: config.cache_control.clone(),
    })
}

// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

pub mod auth;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod exception;
pub mod param;
pub mod proxy;
pub mod redirect;
pub mod request;
pub mod response;
pub mod routing;
pub mod server;
pub mod static_file;
pub mod template;
pub mod tls;
pub mod util;
pub mod websocket;
pub mod ws_proxy;

pub use cache::FileCache;
pub use config::{Config, ProxyTarget};
pub use dispatcher::{Dispatch, Dispatcher, RouteAction};
pub use exception::Exception;
pub use param::{HttpEncoding, HttpVersion};
pub use request::Request;
pub use response::{HeaderList, Response};
pub use routing::RoutingTable;
pub use server::{ConnectionServer, ServerHandle};
pub use util::HtmlBuilder;
pub use websocket::{OpCode, WebSocketFrame};

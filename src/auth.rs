// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! Basic 认证与 location 级访问控制。

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::warn;

use crate::config::AuthSettings;
use crate::request::Request;
use crate::response::{HeaderList, Response};

pub const REALM: &str = "Restricted Area";

pub struct BasicAuthHandler {
    username: String,
    password: String,
}

impl BasicAuthHandler {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// 校验 `Authorization: Basic <base64(user:pass)>`。任何格式问题都只返回 `false`。
    pub fn authenticate(&self, request: &Request) -> bool {
        let Some(header) = request.header("authorization") else {
            return false;
        };
        let Some((scheme, credential)) = header.trim().split_once(' ') else {
            return false;
        };
        if !scheme.eq_ignore_ascii_case("basic") {
            return false;
        }
        let Ok(decoded) = STANDARD.decode(credential.trim()) else {
            return false;
        };
        let Some(colon) = decoded.iter().position(|b| *b == b':') else {
            return false;
        };
        let (user, pass) = (&decoded[..colon], &decoded[colon + 1..]);
        user == self.username.as_bytes() && pass == self.password.as_bytes()
    }
}

/// 按 location 的认证配置校验请求。配置经过加载期校验，只会出现 `basic` 类型。
pub fn authenticate_location(settings: &AuthSettings, request: &Request) -> bool {
    match settings.kind.as_deref() {
        Some("basic") => {
            let handler = BasicAuthHandler::new(
                settings.username.clone().unwrap_or_default(),
                settings.password.clone().unwrap_or_default(),
            );
            handler.authenticate(request)
        }
        other => {
            warn!("未知的认证类型：{:?}", other);
            false
        }
    }
}

/// 401 质询响应
pub fn challenge() -> Response {
    let headers: HeaderList = [("WWW-Authenticate", format!("Basic realm=\"{}\"", REALM))]
        .into_iter()
        .collect();
    Response::with_headers(
        401,
        headers,
        "<html><body><h1>401 Unauthorized</h1><p>Authentication required.</p></body></html>",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(auth: Option<&str>) -> Request {
        let mut raw = String::from("GET /admin HTTP/1.1\r\nHost: localhost\r\n");
        if let Some(value) = auth {
            raw.push_str(&format!("Authorization: {}\r\n", value));
        }
        raw.push_str("\r\n");
        Request::parse(raw.as_bytes())
    }

    fn basic(credential: &str) -> String {
        format!("Basic {}", STANDARD.encode(credential))
    }

    #[test]
    fn test_valid_credentials() {
        let handler = BasicAuthHandler::new("user", "pass");
        assert!(handler.authenticate(&request_with(Some(&basic("user:pass")))));
    }

    /// 密码中允许出现冒号，只按第一个冒号切分
    #[test]
    fn test_password_with_colon() {
        let handler = BasicAuthHandler::new("user", "p:a:ss");
        assert!(handler.authenticate(&request_with(Some(&basic("user:p:a:ss")))));
    }

    #[test]
    fn test_rejections() {
        let handler = BasicAuthHandler::new("user", "pass");
        let cases = [
            None,
            Some(basic("user:wrong")),
            Some(basic("other:pass")),
            Some(basic("userpass")),
            Some("Basic !!!not-base64!!!".to_string()),
            Some("Bearer abc".to_string()),
            Some("Basic".to_string()),
            Some(String::new()),
        ];
        for case in cases {
            assert!(
                !handler.authenticate(&request_with(case.as_deref())),
                "{:?}",
                case
            );
        }
    }

    #[test]
    fn test_location_settings() {
        let settings = AuthSettings {
            kind: Some("basic".into()),
            username: Some("admin".into()),
            password: Some("secret".into()),
        };
        assert!(authenticate_location(&settings, &request_with(Some(&basic("admin:secret")))));
        assert!(!authenticate_location(&settings, &request_with(None)));

        let unknown = AuthSettings {
            kind: None,
            ..settings
        };
        assert!(!authenticate_location(&unknown, &request_with(Some(&basic("admin:secret")))));
    }

    #[test]
    fn test_challenge_response() {
        let response = challenge();
        assert_eq!(response.status_code(), 401);
        assert_eq!(
            response.header("www-authenticate"),
            Some("Basic realm=\"Restricted Area\"")
        );
    }
}

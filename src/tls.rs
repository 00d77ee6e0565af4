// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! TLS 支持：监听端的证书加载与连接 wss 后端的客户端配置，均使用 ring 作为加密后端。

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::exception::Exception;

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// 从 PEM 文件加载证书链与私钥。任一文件无法加载都是启动期的致命错误。
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, Exception> {
    let open = |path: &Path| {
        File::open(path)
            .map(BufReader::new)
            .map_err(|e| Exception::TlsSetup(format!("cannot open {}: {}", path.display(), e)))
    };

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut open(cert_path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Exception::TlsSetup(format!("failed to parse certificate: {}", e)))?;
    if certs.is_empty() {
        return Err(Exception::TlsSetup(format!(
            "no certificate found in {}",
            cert_path.display()
        )));
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut open(key_path)?)
        .map_err(|e| Exception::TlsSetup(format!("failed to parse private key: {}", e)))?
        .ok_or_else(|| {
            Exception::TlsSetup(format!("no private key found in {}", key_path.display()))
        })?;

    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| Exception::TlsSetup(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Exception::TlsSetup(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// 连接 TLS 后端使用的客户端，信任 webpki 根证书
pub fn backend_connector() -> Result<TlsConnector, Exception> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| Exception::TlsSetup(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

pub fn server_name(host: &str) -> Result<ServerName<'static>, Exception> {
    ServerName::try_from(host.to_string())
        .map_err(|e| Exception::TlsSetup(format!("invalid server name {}: {}", host, e)))
}

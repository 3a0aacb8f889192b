use crate::error::{ProxyError, Result};
use anyhow::Context;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// 加载服务器 TLS 配置
///
/// 配置 CA 时，CA 会与系统根证书合并，作为客户端证书的信任根；
/// 未提供客户端证书的连接仍然允许
pub fn load_server_config(
    cert_path: &Path,
    key_path: &Path,
    ca_path: Option<&Path>,
) -> Result<Arc<rustls::ServerConfig>> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let builder = match ca_path {
        Some(ca_path) => {
            let roots = load_trust_pool(ca_path)?;
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .allow_unauthenticated()
                .build()
                .map_err(|e| {
                    ProxyError::ca_certificate(format!(
                        "Failed to build client verifier from {:?}: {}",
                        ca_path, e
                    ))
                })?;
            rustls::ServerConfig::builder().with_client_cert_verifier(verifier)
        }
        None => rustls::ServerConfig::builder().with_no_client_auth(),
    };

    let config = builder.with_single_cert(certs, key).map_err(|e| {
        ProxyError::certificate(format!(
            "Certificate {:?} and key {:?} do not form a valid pair: {}",
            cert_path, key_path, e
        ))
    })?;

    Ok(Arc::new(config))
}

/// 读取 PEM 证书链
fn load_certs(cert_path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let cert_file = File::open(cert_path).map_err(|e| {
        ProxyError::certificate(format!("Failed to open cert file {:?}: {}", cert_path, e))
    })?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            ProxyError::certificate(format!(
                "Failed to parse certificates in {:?}: {}",
                cert_path, e
            ))
        })?;

    if certs.is_empty() {
        return Err(ProxyError::certificate(format!(
            "No certificate found in {:?}",
            cert_path
        )));
    }

    Ok(certs)
}

/// 读取 PEM 私钥（PKCS#1、PKCS#8 或 SEC1）
fn load_private_key(key_path: &Path) -> Result<PrivateKeyDer<'static>> {
    let key_file = File::open(key_path).map_err(|e| {
        ProxyError::certificate(format!("Failed to open key file {:?}: {}", key_path, e))
    })?;
    let mut key_reader = BufReader::new(key_file);

    rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| {
            ProxyError::certificate(format!(
                "Failed to parse private key in {:?}: {}",
                key_path, e
            ))
        })?
        .ok_or_else(|| ProxyError::certificate(format!("No private key found in {:?}", key_path)))
}

/// 系统根证书 + 指定 CA 证书
pub fn load_trust_pool(ca_path: &Path) -> Result<RootCertStore> {
    let ca_file = File::open(ca_path).map_err(|e| {
        ProxyError::ca_certificate(format!("Failed to read CA file {:?}: {}", ca_path, e))
    })?;
    let mut ca_reader = BufReader::new(ca_file);

    // 只使用第一个 PEM 证书块
    let ca_cert = rustls_pemfile::certs(&mut ca_reader)
        .next()
        .ok_or_else(|| {
            ProxyError::ca_certificate(format!("No PEM certificate block in {:?}", ca_path))
        })?
        .map_err(|e| {
            ProxyError::ca_certificate(format!("Failed to decode PEM in {:?}: {}", ca_path, e))
        })?;

    let mut root_store = RootCertStore::empty();
    let native_certs = rustls_native_certs::load_native_certs();
    let (added, ignored) = root_store.add_parsable_certificates(native_certs.certs);
    tracing::debug!(
        "Loaded {} system root certificates ({} ignored)",
        added,
        ignored
    );

    root_store.add(ca_cert).map_err(|e| {
        ProxyError::ca_certificate(format!(
            "Failed to parse x509 CA certificate {:?}: {}",
            ca_path, e
        ))
    })?;

    Ok(root_store)
}

/// 生成自签名证书和私钥并写入指定路径
pub fn generate_self_signed_cert(
    common_name: &str,
    alt_names: &[String],
    cert_out: &Path,
    key_out: &Path,
) -> anyhow::Result<()> {
    // rcgen 至少需要一个 SAN；确保包含 CN
    let mut names: Vec<String> = if alt_names.is_empty() {
        vec![common_name.to_string()]
    } else {
        alt_names.to_vec()
    };

    if !names.iter().any(|n| n == common_name) {
        names.push(common_name.to_string());
    }

    let cert =
        generate_simple_self_signed(names).context("Failed to generate self-signed certificate")?;
    let cert_pem = cert.cert.pem();
    let key_pem = cert.signing_key.serialize_pem();

    std::fs::write(cert_out, cert_pem)
        .with_context(|| format!("Failed to write certificate to {:?}", cert_out))?;
    std::fs::write(key_out, key_pem)
        .with_context(|| format!("Failed to write private key to {:?}", key_out))?;

    Ok(())
}

use super::{InboundConnection, TransportMode};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::tls;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::warn;

/// 代理监听器
///
/// 绑定 TCP 端口；配置了证书和私钥时，所有接受的连接都会升级为 TLS
pub struct ProxyListener {
    listener: TcpListener,
    upgrader: Upgrader,
    mode: TransportMode,
}

impl ProxyListener {
    /// 绑定监听地址并加载 TLS 材料
    pub async fn bind(config: &ProxyConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ProxyError::config(format!("{:#}", e)))?;

        let (acceptor, mode) = match (&config.cert_path, &config.key_path) {
            (Some(cert_path), Some(key_path)) => {
                let tls_config =
                    tls::load_server_config(cert_path, key_path, config.ca_path.as_deref())?;
                let mode = TransportMode::Tls {
                    cert_path: cert_path.clone(),
                    key_path: key_path.clone(),
                    ca_path: config.ca_path.clone(),
                };
                (Some(TlsAcceptor::from(tls_config)), mode)
            }
            _ => (None, TransportMode::Plain),
        };

        let addr = normalize_listen_addr(&config.listen_addr);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ProxyError::bind(&config.listen_addr, e))?;

        Ok(Self {
            listener,
            upgrader: Upgrader { acceptor },
            mode,
        })
    }

    /// 实际绑定的地址
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn mode(&self) -> &TransportMode {
        &self.mode
    }

    /// 接受一个 TCP 连接（不做 TLS 握手，握手交给连接任务）
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer_addr) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }
        Ok((stream, peer_addr))
    }

    /// 可在连接任务中使用的升级器
    pub fn upgrader(&self) -> Upgrader {
        self.upgrader.clone()
    }
}

/// 把已接受的 TCP 连接升级为入站连接
#[derive(Clone)]
pub struct Upgrader {
    acceptor: Option<TlsAcceptor>,
}

impl Upgrader {
    pub async fn upgrade(&self, stream: TcpStream, peer_addr: SocketAddr) -> Result<InboundConnection> {
        match &self.acceptor {
            Some(acceptor) => {
                let tls_stream = acceptor
                    .accept(stream)
                    .await
                    .map_err(ProxyError::Handshake)?;
                Ok(InboundConnection::new(tls_stream, peer_addr))
            }
            None => Ok(InboundConnection::new(stream, peer_addr)),
        }
    }
}

/// `:1080` 形式表示监听所有接口
fn normalize_listen_addr(addr: &str) -> String {
    let addr = addr.trim();
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}

mod listener;

pub use listener::{ProxyListener, Upgrader};

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

/// 传输层模式（启动时确定，监听器生命周期内不变）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMode {
    /// 明文 TCP
    Plain,
    /// TLS 终止
    Tls {
        cert_path: PathBuf,
        key_path: PathBuf,
        ca_path: Option<PathBuf>,
    },
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Plain => write!(f, "plain"),
            TransportMode::Tls {
                cert_path,
                key_path,
                ca_path,
            } => {
                write!(
                    f,
                    "tls, cert file: {}, key file: {}",
                    cert_path.display(),
                    key_path.display()
                )?;
                if let Some(ca_path) = ca_path {
                    write!(f, ", CA cert file: {}", ca_path.display())?;
                }
                Ok(())
            }
        }
    }
}

/// 传输层连接抽象
///
/// 统一封装明文 TCP 与 TLS 连接
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

// 为所有满足条件的类型自动实现 Transport
impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// 已接受（且已完成 TLS 握手）的入站连接
pub struct InboundConnection {
    pub stream: Pin<Box<dyn Transport>>,
    pub peer_addr: SocketAddr,
}

impl InboundConnection {
    pub fn new<S: Transport>(stream: S, peer_addr: SocketAddr) -> Self {
        Self {
            stream: Box::pin(stream),
            peer_addr,
        }
    }
}

impl fmt::Debug for InboundConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundConnection")
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

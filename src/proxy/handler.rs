use super::{forward, tunnel};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::h1::{read_request_head, version_str, RequestHead};
use crate::observer::ProxyObserver;
use crate::transport::InboundConnection;
use async_trait::async_trait;
use http::uri::Authority;
use http::Version;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// 默认的明文 HTTP 端口
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// 默认的 TLS 端口
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// 远程连接拨号接口
#[async_trait]
pub trait Dialer: Send + Sync {
    /// 连接到 `host:port`
    async fn dial(&self, addr: &str) -> io::Result<TcpStream>;
}

/// 直接使用 TCP 连接远程主机
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// 连接处理选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOptions {
    /// 请求/响应头最大字节数
    pub max_header_size: usize,
    /// 拨号失败时回复 502
    pub reply_on_dial_failure: bool,
}

impl From<&ProxyConfig> for HandlerOptions {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            max_header_size: config.max_header_size,
            reply_on_dial_failure: config.reply_on_dial_failure,
        }
    }
}

/// 单个入站连接的处理器
///
/// 读取一个请求，拨号远程主机，然后进入隧道或转发流程。
/// 入站和出站连接都归本次调用所有，任何路径返回时都会被关闭
#[derive(Clone)]
pub struct ConnectionHandler {
    options: HandlerOptions,
    observer: Arc<dyn ProxyObserver>,
    dialer: Arc<dyn Dialer>,
}

impl ConnectionHandler {
    pub fn new(options: HandlerOptions, observer: Arc<dyn ProxyObserver>) -> Self {
        Self {
            options,
            observer,
            dialer: Arc::new(TcpDialer),
        }
    }

    /// 替换拨号器
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    pub fn observer(&self) -> &Arc<dyn ProxyObserver> {
        &self.observer
    }

    /// 处理一个入站连接直到结束
    pub async fn handle(&self, conn: InboundConnection) -> Result<()> {
        let InboundConnection { stream, peer_addr } = conn;
        let mut client = BufReader::new(stream);

        let head = read_request_head(&mut client, self.options.max_header_size).await?;
        self.observer.request(peer_addr, &head);

        let target = resolve_target(&head)?;
        let body_framing = if head.is_connect() {
            None
        } else {
            Some(head.body_framing()?)
        };

        let remote = match self.dialer.dial(&target).await {
            Ok(remote) => remote,
            Err(e) => {
                if self.options.reply_on_dial_failure {
                    // 客户端可能已经断开，写入失败不影响返回的错误
                    let _ = write_bad_gateway(&mut client, head.version).await;
                }
                return Err(ProxyError::dial(target, e));
            }
        };

        match body_framing {
            None => {
                tunnel::relay(
                    client,
                    remote,
                    &head,
                    &target,
                    peer_addr,
                    self.observer.clone(),
                )
                .await
            }
            Some(framing) => {
                forward::forward(
                    &mut client,
                    remote,
                    &head,
                    framing,
                    peer_addr,
                    self.observer.as_ref(),
                    self.options.max_header_size,
                )
                .await
            }
        }
    }
}

/// 计算要拨号的远程地址
///
/// 已带端口时原样使用；否则 CONNECT 请求补 443，普通请求补 80。
/// 普通请求总是以明文转发，与入站是否 TLS 无关
pub fn resolve_target(head: &RequestHead) -> Result<String> {
    let authority: Authority = head.host.parse().map_err(|e| {
        ProxyError::malformed_request(format!("invalid target host '{}': {}", head.host, e))
    })?;

    let port = match authority.port_u16() {
        Some(port) => port,
        None if head.is_connect() => DEFAULT_HTTPS_PORT,
        None => DEFAULT_HTTP_PORT,
    };

    Ok(format!("{}:{}", authority.host(), port))
}

async fn write_bad_gateway<W>(writer: &mut W, version: Version) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response = format!(
        "{} 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        version_str(version)
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await
}

mod forward;
mod handler;
mod tunnel;

pub use handler::{
    resolve_target, ConnectionHandler, Dialer, HandlerOptions, TcpDialer, DEFAULT_HTTPS_PORT,
    DEFAULT_HTTP_PORT,
};

use crate::config::ProxyConfig;
use crate::error::Result;
use crate::observer::{ProxyObserver, TracingObserver};
use crate::transport::ProxyListener;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

/// accept 失败后的等待时间
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// 代理服务器：接受循环
///
/// 每个连接在独立任务中处理，循环本身只等待 accept 和关闭信号
pub struct ProxyServer {
    listener: ProxyListener,
    handler: ConnectionHandler,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    /// 按配置绑定监听器，使用 tracing 观察者
    pub async fn bind(config: &ProxyConfig) -> Result<Self> {
        Self::bind_with_observer(config, Arc::new(TracingObserver)).await
    }

    pub async fn bind_with_observer(
        config: &ProxyConfig,
        observer: Arc<dyn ProxyObserver>,
    ) -> Result<Self> {
        let listener = ProxyListener::bind(config).await?;
        let handler = ConnectionHandler::new(HandlerOptions::from(config), observer);
        Ok(Self::from_parts(listener, handler))
    }

    /// 使用自定义的处理器（例如替换拨号器）
    pub fn from_parts(listener: ProxyListener, handler: ConnectionHandler) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            listener,
            handler,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 关闭句柄：停止接受新连接，已建立的连接不受影响
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// 运行接受循环，直到收到关闭信号
    pub async fn run(self) -> Result<()> {
        let local_addr = self.listener.local_addr()?;
        let observer = self.handler.observer().clone();
        observer.listener_started(local_addr, self.listener.mode());

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let upgrader = self.listener.upgrader();
                            let handler = self.handler.clone();

                            tokio::spawn(async move {
                                let result = match upgrader.upgrade(stream, peer_addr).await {
                                    Ok(conn) => handler.handle(conn).await,
                                    Err(e) => Err(e),
                                };
                                if let Err(e) = result {
                                    handler.observer().handler_error(peer_addr, &e);
                                }
                            });
                        }
                        Err(e) => {
                            observer.accept_error(&e);
                            sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
                _ = wait_closed(&mut shutdown_rx) => {
                    observer.listener_closed(local_addr);
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    // 发送端与 ProxyServer 同生命周期，不会提前关闭
    let _ = rx.wait_for(|closed| *closed).await;
}

/// 关闭接受循环的句柄
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// 关闭监听器
    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }
}

/// 可观测性接口
///
/// 连接处理逻辑不直接使用全局日志，而是通过注入的观察者上报事件
use crate::error::ProxyError;
use crate::h1::{RequestHead, ResponseHead};
use crate::transport::TransportMode;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

/// 隧道数据方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDirection {
    /// 客户端 -> 远程
    ClientToRemote,
    /// 远程 -> 客户端
    RemoteToClient,
}

impl fmt::Display for RelayDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayDirection::ClientToRemote => write!(f, "client -> remote"),
            RelayDirection::RemoteToClient => write!(f, "remote -> client"),
        }
    }
}

/// 代理事件观察者
///
/// 所有方法都有空的默认实现，按需覆盖
pub trait ProxyObserver: Send + Sync {
    /// 监听器开始接受连接
    fn listener_started(&self, _local_addr: SocketAddr, _mode: &TransportMode) {}

    /// 监听器停止接受连接
    fn listener_closed(&self, _local_addr: SocketAddr) {}

    /// 解析到入站请求
    fn request(&self, _peer: SocketAddr, _head: &RequestHead) {}

    /// 解析到远程响应
    fn response(&self, _peer: SocketAddr, _head: &ResponseHead) {}

    /// 隧道结束
    fn tunnel_closed(&self, _peer: SocketAddr, _target: &str, _sent: u64, _received: u64) {}

    /// 隧道单方向复制出错（正常断开时也会出现）
    fn relay_error(&self, _peer: SocketAddr, _direction: RelayDirection, _err: &io::Error) {}

    /// 连接处理失败
    fn handler_error(&self, _peer: SocketAddr, _err: &ProxyError) {}

    /// accept 失败（可恢复）
    fn accept_error(&self, _err: &io::Error) {}
}

/// 基于 tracing 的默认观察者
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ProxyObserver for TracingObserver {
    fn listener_started(&self, local_addr: SocketAddr, mode: &TransportMode) {
        info!("Listening on {} ({})", local_addr, mode);
    }

    fn listener_closed(&self, local_addr: SocketAddr) {
        info!("Listener on {} closed", local_addr);
    }

    fn request(&self, peer: SocketAddr, head: &RequestHead) {
        info!(
            "Request from {}: {} {:?} {}",
            peer, head.method, head.version, head.host
        );
        for (key, value) in head.headers.iter() {
            debug!("< {}: {}", key, String::from_utf8_lossy(value.as_bytes()));
        }
    }

    fn response(&self, peer: SocketAddr, head: &ResponseHead) {
        info!(
            "Response to {}: {} {:?}",
            peer,
            head.status.as_u16(),
            head.version
        );
        for (key, value) in head.headers.iter() {
            debug!("> {}: {}", key, String::from_utf8_lossy(value.as_bytes()));
        }
    }

    fn tunnel_closed(&self, peer: SocketAddr, target: &str, sent: u64, received: u64) {
        info!(
            "Tunnel {} <-> {} closed: {} bytes sent, {} bytes received",
            peer, target, sent, received
        );
    }

    fn relay_error(&self, peer: SocketAddr, direction: RelayDirection, err: &io::Error) {
        debug!("Tunnel {} ({}) copy error: {}", peer, direction, err);
    }

    fn handler_error(&self, peer: SocketAddr, err: &ProxyError) {
        warn!("Handle connection from {} failed: {}", peer, err);
    }

    fn accept_error(&self, err: &io::Error) {
        warn!("Accept connection failed: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_display() {
        assert_eq!(RelayDirection::ClientToRemote.to_string(), "client -> remote");
        assert_eq!(RelayDirection::RemoteToClient.to_string(), "remote -> client");
    }
}

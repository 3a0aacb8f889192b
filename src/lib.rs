//! HTTP 正向代理库入口
//!
//! 将核心模块导出为库，方便测试和复用
pub mod config;
pub mod error;
pub mod h1;
pub mod observer;
pub mod proxy;
pub mod tls;
pub mod transport;

// 重新导出常用类型
pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use observer::{ProxyObserver, RelayDirection, TracingObserver};
pub use proxy::{ConnectionHandler, Dialer, HandlerOptions, ProxyServer, ShutdownHandle, TcpDialer};
pub use transport::{InboundConnection, ProxyListener, TransportMode};

/// 自定义错误类型
///
/// 启动阶段错误（绑定、证书、CA）会终止进程；
/// 连接阶段错误只影响单个连接，由观察者记录后关闭连接
use std::io;
use thiserror::Error;

/// 代理的主要错误类型
#[derive(Error, Debug)]
pub enum ProxyError {
    /// 监听地址绑定失败
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 服务器证书或私钥加载失败
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// CA 证书加载失败
    #[error("CA certificate error: {0}")]
    CaCertificate(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 入站 TLS 握手失败
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    /// 请求头格式错误
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// 响应头格式错误
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// 消息体分块格式错误
    #[error("Malformed message body: {0}")]
    MalformedBody(String),

    /// 远程主机连接失败
    #[error("Failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 转发写入失败
    #[error("Forward write failed: {0}")]
    ForwardWrite(#[source] io::Error),

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    /// 创建绑定失败错误
    pub fn bind(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }

    /// 创建连接远程主机失败错误
    pub fn dial(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Dial {
            addr: addr.into(),
            source,
        }
    }

    pub fn certificate(msg: impl Into<String>) -> Self {
        Self::Certificate(msg.into())
    }

    pub fn ca_certificate(msg: impl Into<String>) -> Self {
        Self::CaCertificate(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn malformed_request(msg: impl Into<String>) -> Self {
        Self::MalformedRequest(msg.into())
    }

    pub fn malformed_response(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    pub fn malformed_body(msg: impl Into<String>) -> Self {
        Self::MalformedBody(msg.into())
    }

    /// 是否为启动阶段错误（进程应退出）
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::Bind { .. } | Self::Certificate(_) | Self::CaCertificate(_) | Self::Config(_)
        )
    }

    /// 检查是否为请求解析错误
    pub fn is_malformed_request(&self) -> bool {
        matches!(self, Self::MalformedRequest(_))
    }

    /// 检查是否为拨号错误
    pub fn is_dial(&self) -> bool {
        matches!(self, Self::Dial { .. })
    }
}

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 默认监听地址
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:1080";

/// 请求/响应头最大大小（默认 64KB）
pub const DEFAULT_MAX_HEADER_SIZE: usize = 64 * 1024;

/// 代理配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// 监听地址（host:port，`:port` 表示所有接口）
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// TLS 证书路径
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    /// TLS 私钥路径
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// 额外信任的 CA 证书路径（PEM，需同时配置证书和私钥）
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    /// 请求/响应头最大字节数
    #[serde(default = "default_max_header_size")]
    pub max_header_size: usize,
    /// 连接远程主机失败时是否向客户端回复 502
    #[serde(default)]
    pub reply_on_dial_failure: bool,
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_max_header_size() -> usize {
    DEFAULT_MAX_HEADER_SIZE
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            cert_path: None,
            key_path: None,
            ca_path: None,
            max_header_size: default_max_header_size(),
            reply_on_dial_failure: false,
        }
    }
}

impl ProxyConfig {
    /// 是否启用入站 TLS
    pub fn tls_enabled(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.listen_addr.trim().is_empty() {
            bail!("listen_addr cannot be empty");
        }

        match (&self.cert_path, &self.key_path) {
            (Some(_), Some(_)) | (None, None) => {}
            _ => bail!("cert_path and key_path must both be set, or both omitted"),
        }

        if self.ca_path.is_some() && !self.tls_enabled() {
            bail!("ca_path requires cert_path and key_path to be set");
        }

        if self.max_header_size < 64 {
            bail!(
                "max_header_size must be at least 64 bytes, got {}",
                self.max_header_size
            );
        }

        Ok(())
    }

    /// 从 TOML 文本解析配置（`[proxy]` 表）
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        #[derive(Deserialize)]
        struct ProxyConfigWrapper {
            #[serde(default)]
            proxy: ProxyConfig,
        }

        let wrapper: ProxyConfigWrapper =
            toml::from_str(content).context("Failed to parse proxy configuration")?;
        wrapper
            .proxy
            .validate()
            .context("Proxy configuration validation failed")?;
        Ok(wrapper.proxy)
    }

    /// 从文件加载配置
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path))?;
        Self::from_toml(&content)
    }

    /// 用命令行参数覆盖配置文件中的值
    pub fn apply_overrides(
        &mut self,
        addr: Option<String>,
        cert: Option<PathBuf>,
        key: Option<PathBuf>,
        ca: Option<PathBuf>,
    ) {
        if let Some(addr) = addr {
            self.listen_addr = addr;
        }
        if let Some(cert) = cert {
            self.cert_path = Some(cert);
        }
        if let Some(key) = key {
            self.key_path = Some(key);
        }
        if let Some(ca) = ca {
            self.ca_path = Some(ca);
        }
    }
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "http-forward-proxy")]
#[command(author, version, about = "Forward HTTP proxy with CONNECT tunneling", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 日志级别 (trace, debug, info, warn, error)，设置 RUST_LOG 时以其为准
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 运行代理
    Run {
        /// 配置文件路径（可选）
        #[arg(short, long)]
        config: Option<String>,

        /// 监听地址，例如 0.0.0.0:1080 或 :1080
        #[arg(long)]
        addr: Option<String>,

        /// (TLS) 服务器证书文件
        #[arg(long, value_name = "PATH")]
        cert: Option<PathBuf>,

        /// (TLS) 服务器私钥文件
        #[arg(long, value_name = "PATH")]
        key: Option<PathBuf>,

        /// (TLS) 额外信任的 CA 证书文件
        #[arg(long, value_name = "PATH")]
        ca: Option<PathBuf>,
    },
    /// 检查配置文件格式是否正确
    Check {
        /// 配置文件路径
        #[arg(short, long)]
        config: String,
    },
    /// 生成自签名证书和私钥
    Cert {
        /// 证书输出路径
        #[arg(long, default_value = "cert.pem")]
        cert_out: String,

        /// 私钥输出路径
        #[arg(long, default_value = "key.pem")]
        key_out: String,

        /// 证书的 Common Name
        #[arg(long, default_value = "localhost")]
        common_name: String,

        /// 证书的 SubjectAltName（用逗号分隔多个）
        #[arg(long, value_delimiter = ',', value_name = "DNS,...")]
        alt_names: Vec<String>,
    },
}

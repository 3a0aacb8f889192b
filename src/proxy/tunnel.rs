use crate::error::{ProxyError, Result};
use crate::h1::{version_str, RequestHead};
use crate::observer::{ProxyObserver, RelayDirection};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinError;

/// 数据复制缓冲区大小（64KB 适合高吞吐）
const COPY_BUFFER_SIZE: usize = 65536;

/// CONNECT 隧道
///
/// 回复 200 后启动两个方向的复制任务，两边都结束才返回。
/// 复制错误只上报给观察者，不作为连接错误
pub async fn relay<C>(
    mut client: BufReader<C>,
    remote: TcpStream,
    head: &RequestHead,
    target: &str,
    peer_addr: SocketAddr,
    observer: Arc<dyn ProxyObserver>,
) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let response = format!("{} 200 OK\r\n\r\n", version_str(head.version));
    client
        .write_all(response.as_bytes())
        .await
        .map_err(ProxyError::ForwardWrite)?;
    client.flush().await.map_err(ProxyError::ForwardWrite)?;

    // BufReader 中已缓冲的数据会先被读出，不会丢失
    let (client_read, client_write) = tokio::io::split(client);
    let (remote_read, remote_write) = remote.into_split();

    let client_to_remote = tokio::spawn(pump(
        client_read,
        remote_write,
        peer_addr,
        RelayDirection::ClientToRemote,
        observer.clone(),
    ));
    let remote_to_client = tokio::spawn(pump(
        remote_read,
        client_write,
        peer_addr,
        RelayDirection::RemoteToClient,
        observer.clone(),
    ));

    let (sent, received) = tokio::join!(client_to_remote, remote_to_client);
    let sent = bytes_copied(sent, peer_addr, RelayDirection::ClientToRemote, observer.as_ref());
    let received = bytes_copied(
        received,
        peer_addr,
        RelayDirection::RemoteToClient,
        observer.as_ref(),
    );
    observer.tunnel_closed(peer_addr, target, sent, received);

    Ok(())
}

/// 复制任务异常退出时上报错误，字节数记为 0
fn bytes_copied(
    result: std::result::Result<u64, JoinError>,
    peer_addr: SocketAddr,
    direction: RelayDirection,
    observer: &dyn ProxyObserver,
) -> u64 {
    result.unwrap_or_else(|e| {
        observer.relay_error(peer_addr, direction, &io::Error::other(e));
        0
    })
}

/// 单方向复制，源端 EOF 后关闭目标端写方向，让对端也看到 EOF
async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    peer_addr: SocketAddr,
    direction: RelayDirection,
    observer: Arc<dyn ProxyObserver>,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total_copied = 0u64;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                observer.relay_error(peer_addr, direction, &e);
                break;
            }
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            observer.relay_error(peer_addr, direction, &e);
            break;
        }
        total_copied += n as u64;
    }

    if let Err(e) = writer.shutdown().await {
        observer.relay_error(peer_addr, direction, &e);
    }

    total_copied
}

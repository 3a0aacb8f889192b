use crate::error::{ProxyError, Result};
use crate::h1::{read_response_head, relay_body, BodyFraming, RequestHead};
use crate::observer::ProxyObserver;
use http::StatusCode;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// 最终响应之前允许的 1xx 中间响应数量
const MAX_INTERIM_RESPONSES: usize = 16;

/// 转发一次请求/响应
///
/// 请求完整写入远程之后才开始读取响应；每个连接只转发一对
pub async fn forward<C>(
    client: &mut BufReader<C>,
    remote: TcpStream,
    head: &RequestHead,
    body_framing: BodyFraming,
    peer_addr: SocketAddr,
    observer: &dyn ProxyObserver,
    max_header_size: usize,
) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let mut remote = BufReader::new(remote);

    remote
        .write_all(&head.encode())
        .await
        .map_err(ProxyError::ForwardWrite)?;
    relay_body(client, &mut remote, body_framing).await?;
    remote.flush().await.map_err(ProxyError::ForwardWrite)?;

    let mut interim = 0;
    let response = loop {
        let response = read_response_head(&mut remote, max_header_size).await?;
        observer.response(peer_addr, &response);

        // 1xx 中间响应直接转给客户端，继续等待最终响应
        if response.status.is_informational() && response.status != StatusCode::SWITCHING_PROTOCOLS
        {
            interim += 1;
            if interim > MAX_INTERIM_RESPONSES {
                return Err(ProxyError::malformed_response(format!(
                    "more than {} interim responses",
                    MAX_INTERIM_RESPONSES
                )));
            }
            client
                .write_all(&response.raw)
                .await
                .map_err(ProxyError::ForwardWrite)?;
            continue;
        }
        break response;
    };

    let framing = response.body_framing(&head.method)?;
    client
        .write_all(&response.raw)
        .await
        .map_err(ProxyError::ForwardWrite)?;
    relay_body(&mut remote, client, framing).await?;
    client.flush().await.map_err(ProxyError::ForwardWrite)?;

    // 不复用连接，写完即关闭
    let _ = client.shutdown().await;

    Ok(())
}

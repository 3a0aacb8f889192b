use crate::error::{ProxyError, Result};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, StatusCode};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 数据复制缓冲区大小（64KB 适合高吞吐）
const COPY_BUFFER_SIZE: usize = 65536;

/// 分块长度行 / trailer 行的最大长度
const MAX_CHUNK_LINE: usize = 8192;

/// 消息体的帧格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// 没有消息体
    Empty,
    /// Content-Length 指定长度
    Length(u64),
    /// Transfer-Encoding: chunked
    Chunked,
    /// 读到连接关闭为止（仅响应）
    UntilEof,
}

/// Transfer-Encoding 的最后一个编码是否为 chunked；无该头部时返回 None
fn chunked_transfer(headers: &HeaderMap) -> Option<bool> {
    let mut last = None;
    for value in headers.get_all(TRANSFER_ENCODING) {
        let value = String::from_utf8_lossy(value.as_bytes());
        for coding in value.split(',') {
            let coding = coding.trim();
            if !coding.is_empty() {
                last = Some(coding.eq_ignore_ascii_case("chunked"));
            }
        }
    }
    last.or_else(|| headers.contains_key(TRANSFER_ENCODING).then_some(false))
}

/// 解析 Content-Length；多个值必须一致
fn content_length(headers: &HeaderMap) -> std::result::Result<Option<u64>, String> {
    let mut length = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let value = value
            .to_str()
            .map_err(|_| "Content-Length is not valid ASCII".to_string())?;
        for part in value.split(',') {
            let part = part.trim();
            let n: u64 = part
                .parse()
                .map_err(|_| format!("invalid Content-Length '{}'", part))?;
            match length {
                Some(prev) if prev != n => {
                    return Err(format!("conflicting Content-Length {} and {}", prev, n))
                }
                _ => length = Some(n),
            }
        }
    }
    Ok(length)
}

pub(crate) fn request_framing(headers: &HeaderMap) -> std::result::Result<BodyFraming, String> {
    match chunked_transfer(headers) {
        Some(true) => Ok(BodyFraming::Chunked),
        Some(false) => Err("request Transfer-Encoding must end with chunked".to_string()),
        None => Ok(match content_length(headers)? {
            Some(0) | None => BodyFraming::Empty,
            Some(n) => BodyFraming::Length(n),
        }),
    }
}

pub(crate) fn response_framing(
    request_method: &Method,
    status: StatusCode,
    headers: &HeaderMap,
) -> std::result::Result<BodyFraming, String> {
    if *request_method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(BodyFraming::Empty);
    }

    match chunked_transfer(headers) {
        Some(true) => Ok(BodyFraming::Chunked),
        Some(false) => Ok(BodyFraming::UntilEof),
        None => Ok(match content_length(headers)? {
            Some(0) => BodyFraming::Empty,
            Some(n) => BodyFraming::Length(n),
            None => BodyFraming::UntilEof,
        }),
    }
}

/// 按帧格式把消息体从 reader 原样复制到 writer，返回复制的字节数
///
/// 读取失败返回 `Io`/`MalformedBody`，写入失败返回 `ForwardWrite`
pub async fn relay_body<R, W>(reader: &mut R, writer: &mut W, framing: BodyFraming) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match framing {
        BodyFraming::Empty => Ok(0),
        BodyFraming::Length(n) => copy_exact(reader, writer, n).await,
        BodyFraming::UntilEof => copy_to_eof(reader, writer).await,
        BodyFraming::Chunked => relay_chunked(reader, writer).await,
    }
}

async fn copy_exact<R, W>(reader: &mut R, writer: &mut W, len: u64) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE.min(len as usize)];
    let mut remaining = len;

    while remaining > 0 {
        let want = buf.len().min(remaining as usize);
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(ProxyError::malformed_body(format!(
                "unexpected EOF after {} of {} body bytes",
                len - remaining,
                len
            )));
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(ProxyError::ForwardWrite)?;
        remaining -= n as u64;
    }

    Ok(len)
}

async fn copy_to_eof<R, W>(reader: &mut R, writer: &mut W) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total_copied = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(ProxyError::ForwardWrite)?;
        total_copied += n as u64;
    }

    Ok(total_copied)
}

/// 原样转发分块编码（包括分块扩展和 trailer）
async fn relay_chunked<R, W>(reader: &mut R, writer: &mut W) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total_copied = 0u64;

    loop {
        let line = read_line(reader).await?;
        let size = parse_chunk_size(&line)?;
        write_raw(writer, &line).await?;
        total_copied += line.len() as u64;

        if size == 0 {
            // trailer 直到空行
            loop {
                let line = read_line(reader).await?;
                write_raw(writer, &line).await?;
                total_copied += line.len() as u64;
                if is_blank(&line) {
                    return Ok(total_copied);
                }
            }
        }

        total_copied += copy_exact(reader, writer, size).await?;

        let line = read_line(reader).await?;
        if !is_blank(&line) {
            return Err(ProxyError::malformed_body("missing CRLF after chunk data"));
        }
        write_raw(writer, &line).await?;
        total_copied += line.len() as u64;
    }
}

async fn read_line<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    (&mut *reader)
        .take(MAX_CHUNK_LINE as u64)
        .read_until(b'\n', &mut line)
        .await?;

    if line.last() != Some(&b'\n') {
        return Err(if line.len() >= MAX_CHUNK_LINE {
            ProxyError::malformed_body("chunk line too long")
        } else {
            ProxyError::malformed_body("unexpected EOF in chunked body")
        });
    }
    Ok(line)
}

async fn write_raw<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(data).await.map_err(ProxyError::ForwardWrite)
}

fn is_blank(line: &[u8]) -> bool {
    line == b"\r\n" || line == b"\n"
}

fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(line)
        .map_err(|_| ProxyError::malformed_body("chunk size line is not valid UTF-8"))?;
    let size = text
        .split(';')
        .next()
        .unwrap_or_default()
        .trim_matches(|c: char| c == ' ' || c == '\t' || c == '\r' || c == '\n');

    if size.is_empty() {
        return Err(ProxyError::malformed_body("empty chunk size"));
    }

    u64::from_str_radix(size, 16)
        .map_err(|_| ProxyError::malformed_body(format!("invalid chunk size '{}'", size)))
}

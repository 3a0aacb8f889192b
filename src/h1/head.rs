use super::body::{request_framing, response_framing};
use super::{version_str, BodyFraming};
use crate::error::{ProxyError, Result};
use http::header::{HeaderName, HeaderValue, HOST};
use http::uri::Authority;
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use std::borrow::Cow;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// 已解析的请求头
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// 请求行中的原始 request-target
    pub target: String,
    pub version: Version,
    /// 声明的目标主机（可能带端口）
    pub host: String,
    /// 头部（键不区分大小写，同名多值按顺序保留）
    pub headers: HeaderMap,
    /// 请求行之后的原始头部行（含结尾空行），转发时原样写出
    pub raw_headers: Vec<u8>,
}

impl RequestHead {
    pub fn is_connect(&self) -> bool {
        self.method == Method::CONNECT
    }

    /// 转发给远程时使用的 request-target（absolute-form 改写为 origin-form）
    pub fn origin_form(&self) -> Cow<'_, str> {
        if !self.target.starts_with('/') {
            if let Ok(uri) = self.target.parse::<Uri>() {
                if uri.scheme().is_some() {
                    return match uri.query() {
                        Some(query) => Cow::Owned(format!("{}?{}", uri.path(), query)),
                        None => Cow::Owned(uri.path().to_string()),
                    };
                }
            }
        }
        Cow::Borrowed(&self.target)
    }

    /// 请求体的帧格式
    pub fn body_framing(&self) -> Result<BodyFraming> {
        request_framing(&self.headers).map_err(ProxyError::malformed_request)
    }

    /// 序列化请求头（不包含请求体）
    ///
    /// 只改写请求行，头部行保持原始字节
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.raw_headers.len() + 128);
        buf.extend_from_slice(self.method.as_str().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.origin_form().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(version_str(self.version).as_bytes());
        buf.extend_from_slice(b"\r\n");

        if !self.headers.contains_key(HOST) {
            buf.extend_from_slice(b"Host: ");
            buf.extend_from_slice(self.host.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }

        buf.extend_from_slice(&self.raw_headers);
        buf
    }
}

/// 已解析的响应头
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
    /// 原始响应头字节，原样写回客户端
    pub raw: Vec<u8>,
}

impl ResponseHead {
    /// 响应体的帧格式，取决于请求方法和状态码
    pub fn body_framing(&self, request_method: &Method) -> Result<BodyFraming> {
        response_framing(request_method, self.status, &self.headers)
            .map_err(ProxyError::malformed_response)
    }
}

enum RawHead {
    Complete(Vec<u8>),
    Eof(usize),
    TooLarge,
}

/// 逐行读取直到空行，不会读走报文头之后的数据
async fn read_raw_head<R>(reader: &mut R, max_size: usize) -> std::io::Result<RawHead>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut seen_start_line = false;

    loop {
        let remaining = max_size.saturating_sub(buf.len());
        if remaining == 0 {
            return Ok(RawHead::TooLarge);
        }

        let start = buf.len();
        let n = (&mut *reader)
            .take(remaining as u64)
            .read_until(b'\n', &mut buf)
            .await?;

        if n == 0 || buf.last() != Some(&b'\n') {
            return Ok(if buf.len() >= max_size {
                RawHead::TooLarge
            } else {
                RawHead::Eof(buf.len())
            });
        }

        let line = &buf[start..];
        let blank = line == b"\r\n" || line == b"\n";
        if blank && seen_start_line {
            return Ok(RawHead::Complete(buf));
        }
        if !blank {
            seen_start_line = true;
        }
    }
}

/// 从入站流读取并解析一个请求头
pub async fn read_request_head<R>(reader: &mut R, max_size: usize) -> Result<RequestHead>
where
    R: AsyncBufRead + Unpin,
{
    match read_raw_head(reader, max_size).await? {
        RawHead::Complete(raw) => parse_request_head(&raw),
        RawHead::Eof(0) => Err(ProxyError::malformed_request(
            "connection closed before request line",
        )),
        RawHead::Eof(n) => Err(ProxyError::malformed_request(format!(
            "unexpected EOF after {} bytes of request head",
            n
        ))),
        RawHead::TooLarge => Err(ProxyError::malformed_request(format!(
            "request head exceeds {} bytes",
            max_size
        ))),
    }
}

/// 从远程流读取并解析一个响应头
pub async fn read_response_head<R>(reader: &mut R, max_size: usize) -> Result<ResponseHead>
where
    R: AsyncBufRead + Unpin,
{
    match read_raw_head(reader, max_size).await? {
        RawHead::Complete(raw) => parse_response_head(raw),
        RawHead::Eof(0) => Err(ProxyError::malformed_response(
            "connection closed before status line",
        )),
        RawHead::Eof(n) => Err(ProxyError::malformed_response(format!(
            "unexpected EOF after {} bytes of response head",
            n
        ))),
        RawHead::TooLarge => Err(ProxyError::malformed_response(format!(
            "response head exceeds {} bytes",
            max_size
        ))),
    }
}

/// 解析完整的请求头字节
pub fn parse_request_head(raw: &[u8]) -> Result<RequestHead> {
    let mut headers = vec![httparse::EMPTY_HEADER; header_capacity(raw)];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(raw) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(ProxyError::malformed_request("incomplete request head"))
        }
        Err(e) => {
            return Err(ProxyError::malformed_request(format!(
                "invalid request head: {}",
                e
            )))
        }
    }

    let method = req
        .method
        .ok_or_else(|| ProxyError::malformed_request("missing method"))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|e| ProxyError::malformed_request(format!("invalid method: {}", e)))?;
    let target = req
        .path
        .ok_or_else(|| ProxyError::malformed_request("missing request target"))?
        .to_string();
    let version = version_from_httparse(req.version).map_err(ProxyError::malformed_request)?;
    let headers = header_map_from_httparse(req.headers).map_err(ProxyError::malformed_request)?;
    let host = declared_host(&target, &headers).map_err(ProxyError::malformed_request)?;
    let raw_headers = raw[request_line_end(raw)..].to_vec();

    Ok(RequestHead {
        method,
        target,
        version,
        host,
        headers,
        raw_headers,
    })
}

/// 解析完整的响应头字节
pub fn parse_response_head(raw: Vec<u8>) -> Result<ResponseHead> {
    let (version, status, reason, headers) = {
        let mut headers = vec![httparse::EMPTY_HEADER; header_capacity(&raw)];
        let mut resp = httparse::Response::new(&mut headers);

        match resp.parse(&raw) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => {
                return Err(ProxyError::malformed_response("incomplete response head"))
            }
            Err(e) => {
                return Err(ProxyError::malformed_response(format!(
                    "invalid response head: {}",
                    e
                )))
            }
        }

        let version =
            version_from_httparse(resp.version).map_err(ProxyError::malformed_response)?;
        let code = resp
            .code
            .ok_or_else(|| ProxyError::malformed_response("missing status code"))?;
        let status = StatusCode::from_u16(code)
            .map_err(|e| ProxyError::malformed_response(format!("invalid status code: {}", e)))?;
        let reason = resp.reason.unwrap_or_default().to_string();
        let headers =
            header_map_from_httparse(resp.headers).map_err(ProxyError::malformed_response)?;
        (version, status, reason, headers)
    };

    Ok(ResponseHead {
        version,
        status,
        reason,
        headers,
        raw,
    })
}

/// 头部数量不会超过报文头的行数，总大小已由 `max_size` 限制
fn header_capacity(raw: &[u8]) -> usize {
    raw.iter().filter(|b| **b == b'\n').count()
}

/// 请求行（跳过前导空行）结束后的偏移
fn request_line_end(raw: &[u8]) -> usize {
    let start = raw
        .iter()
        .position(|b| *b != b'\r' && *b != b'\n')
        .unwrap_or(raw.len());
    raw[start..]
        .iter()
        .position(|b| *b == b'\n')
        .map_or(raw.len(), |pos| start + pos + 1)
}

fn version_from_httparse(version: Option<u8>) -> std::result::Result<Version, String> {
    match version {
        Some(0) => Ok(Version::HTTP_10),
        Some(1) => Ok(Version::HTTP_11),
        other => Err(format!("unsupported HTTP version: {:?}", other)),
    }
}

fn header_map_from_httparse(raw: &[httparse::Header]) -> std::result::Result<HeaderMap, String> {
    let mut map = HeaderMap::with_capacity(raw.len());
    for h in raw.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|e| format!("invalid header name '{}': {}", h.name, e))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|e| format!("invalid value for '{}': {}", h.name, e))?;
        map.append(name, value);
    }
    Ok(map)
}

/// 目标主机：request-target 中的 authority 优先，否则使用 Host 头
fn declared_host(target: &str, headers: &HeaderMap) -> std::result::Result<String, String> {
    if let Ok(uri) = target.parse::<Uri>() {
        if let Some(authority) = uri.authority() {
            return Ok(authority.as_str().to_string());
        }
    }

    let host = headers
        .get(HOST)
        .ok_or_else(|| "missing Host header".to_string())?
        .to_str()
        .map_err(|_| "Host header is not valid ASCII".to_string())?
        .trim();

    host.parse::<Authority>()
        .map_err(|e| format!("invalid Host header '{}': {}", host, e))?;
    Ok(host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_parse_connect() {
        let head =
            parse_request_head(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n")
                .unwrap();
        assert!(head.is_connect());
        assert_eq!(head.host, "example.com:443");
        assert_eq!(head.version, Version::HTTP_11);
    }

    #[test]
    fn test_parse_origin_form_uses_host_header() {
        let head = parse_request_head(b"GET /index.html HTTP/1.0\r\nHost: example.com\r\n\r\n")
            .unwrap();
        assert_eq!(head.method, Method::GET);
        assert_eq!(head.host, "example.com");
        assert_eq!(head.version, Version::HTTP_10);
        assert_eq!(head.origin_form(), "/index.html");
    }

    #[test]
    fn test_parse_absolute_form() {
        let head = parse_request_head(
            b"GET http://example.com:8080/a/b?c=d HTTP/1.1\r\nHost: other.example\r\n\r\n",
        )
        .unwrap();
        assert_eq!(head.host, "example.com:8080");
        assert_eq!(head.origin_form(), "/a/b?c=d");

        let head = parse_request_head(b"GET http://example.com HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(head.origin_form(), "/");
    }

    #[test]
    fn test_headers_case_insensitive_and_multi_valued() {
        let head = parse_request_head(
            b"GET / HTTP/1.1\r\nHost: a\r\nX-Tag: one\r\nx-tag: two\r\nACCEPT: */*\r\n\r\n",
        )
        .unwrap();
        let tags: Vec<_> = head.headers.get_all("X-TAG").iter().collect();
        assert_eq!(tags, vec!["one", "two"]);
        assert_eq!(head.headers.get("accept").unwrap(), "*/*");
    }

    #[test]
    fn test_missing_host_rejected() {
        let err = parse_request_head(b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n").unwrap_err();
        assert!(err.is_malformed_request());
    }

    #[test]
    fn test_garbage_rejected() {
        let err = parse_request_head(b"NOT A REQUEST\r\n\r\n").unwrap_err();
        assert!(err.is_malformed_request());
    }

    #[test]
    fn test_encode_adds_host_and_uses_origin_form() {
        let head =
            parse_request_head(b"POST http://example.com/x HTTP/1.1\r\nContent-Length: 3\r\n\r\n")
                .unwrap();
        let encoded = String::from_utf8(head.encode()).unwrap();
        assert_eq!(
            encoded,
            "POST /x HTTP/1.1\r\nHost: example.com\r\nContent-Length: 3\r\n\r\n"
        );
    }

    #[test]
    fn test_encode_keeps_header_lines_verbatim() {
        let head = parse_request_head(
            b"\r\nGET http://a.example/p HTTP/1.1\r\nHost: a.example\r\nX-Tag: one\r\nAccept: */*\r\nx-tag: two\r\n\r\n",
        )
        .unwrap();
        assert_eq!(
            head.encode(),
            b"GET /p HTTP/1.1\r\nHost: a.example\r\nX-Tag: one\r\nAccept: */*\r\nx-tag: two\r\n\r\n"
        );
    }

    #[test]
    fn test_many_headers_accepted() {
        let mut raw = b"GET / HTTP/1.1\r\nHost: a.example\r\n".to_vec();
        for i in 0..150 {
            raw.extend_from_slice(format!("X-Header-{}: {}\r\n", i, i).as_bytes());
        }
        raw.extend_from_slice(b"\r\n");

        let head = parse_request_head(&raw).unwrap();
        assert_eq!(head.headers.len(), 151);
        assert_eq!(head.headers.get("x-header-149").unwrap(), "149");

        let mut raw = b"HTTP/1.1 200 OK\r\n".to_vec();
        for i in 0..150 {
            raw.extend_from_slice(format!("Set-Cookie: c{}=v\r\n", i).as_bytes());
        }
        raw.extend_from_slice(b"\r\n");
        let head = parse_response_head(raw).unwrap();
        assert_eq!(head.headers.get_all("set-cookie").iter().count(), 150);
    }

    #[tokio::test]
    async fn test_read_request_head_leaves_body_unread() {
        let data: &[u8] = b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nhello";
        let mut reader = BufReader::new(data);
        let head = read_request_head(&mut reader, 1024).await.unwrap();
        assert_eq!(head.method, Method::POST);

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"hello");
    }

    #[tokio::test]
    async fn test_read_request_head_truncated() {
        let data: &[u8] = b"GET / HTTP/1.1\r\nHost: exa";
        let mut reader = BufReader::new(data);
        let err = read_request_head(&mut reader, 1024).await.unwrap_err();
        assert!(err.is_malformed_request());
    }

    #[tokio::test]
    async fn test_read_request_head_empty_stream() {
        let data: &[u8] = b"";
        let mut reader = BufReader::new(data);
        let err = read_request_head(&mut reader, 1024).await.unwrap_err();
        assert!(err.to_string().contains("connection closed"));
    }

    #[tokio::test]
    async fn test_read_request_head_too_large() {
        let mut data = b"GET / HTTP/1.1\r\nHost: a\r\nX-Big: ".to_vec();
        data.extend(std::iter::repeat(b'x').take(500));
        data.extend_from_slice(b"\r\n\r\n");
        let mut reader = BufReader::new(&data[..]);
        let err = read_request_head(&mut reader, 128).await.unwrap_err();
        assert!(err.to_string().contains("exceeds 128 bytes"));
    }

    #[tokio::test]
    async fn test_read_response_head_keeps_raw_bytes() {
        let raw = b"HTTP/1.1 404 Not Found\r\nServer: Test\r\nContent-Length: 0\r\n\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let head = read_response_head(&mut reader, 1024).await.unwrap();
        assert_eq!(head.status, StatusCode::NOT_FOUND);
        assert_eq!(head.reason, "Not Found");
        assert_eq!(head.raw, raw.to_vec());
        assert_eq!(head.headers.get("server").unwrap(), "Test");
    }

    #[tokio::test]
    async fn test_read_response_head_malformed() {
        let raw: &[u8] = b"SSH-2.0-OpenSSH\r\n\r\n";
        let mut reader = BufReader::new(raw);
        let err = read_response_head(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedResponse(_)));
    }
}

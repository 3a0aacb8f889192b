//! HTTP/1.x 报文帧处理
//!
//! 只负责解析请求/响应头和按帧格式原样搬运消息体，不修改内容
mod body;
mod head;

pub use body::{relay_body, BodyFraming};
pub use head::{
    parse_request_head, parse_response_head, read_request_head, read_response_head, RequestHead,
    ResponseHead,
};

use http::Version;

/// 协议版本的报文写法
pub fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    }
}

use bytes::{BufMut, BytesMut};
use std::fmt::Write as _;

use crate::http::constants::{CRLF, HEADER_SEPARATOR, SP};
use crate::http::headers::HeaderCollection;
use crate::http::method::Version;
use crate::http::request::RequestHead;
use crate::http::response::ResponseHead;

/// Serializes a request line and headers, ending with the blank line.
pub fn write_request_head(buf: &mut BytesMut, head: &RequestHead, target: &str) {
    buf.put_slice(head.method().as_str().as_bytes());
    buf.put_u8(SP);
    buf.put_slice(target.as_bytes());
    buf.put_u8(SP);
    buf.put_slice(head.version().as_bytes());
    buf.put_slice(CRLF);

    write_headers(buf, head.headers());
}

/// Serializes a status line and headers, ending with the blank line.
pub fn write_response_head(
    buf: &mut BytesMut,
    version: Version,
    status: u16,
    reason: &str,
    headers: &HeaderCollection,
) {
    buf.put_slice(version.as_bytes());
    buf.put_u8(SP);
    let _ = write!(buf, "{status:03}");
    buf.put_u8(SP);
    buf.put_slice(reason.as_bytes());
    buf.put_slice(CRLF);

    write_headers(buf, headers);
}

pub fn response_head_bytes(head: &ResponseHead) -> BytesMut {
    let mut buf = BytesMut::with_capacity(256);
    write_response_head(&mut buf, head.version(), head.status(), head.reason(), head.headers());
    buf
}

/// Writes every field on its own line; duplicates stay separate.
pub fn write_headers(buf: &mut BytesMut, headers: &HeaderCollection) {
    for (name, value) in headers {
        buf.put_slice(name.as_bytes());
        buf.put_slice(HEADER_SEPARATOR);
        buf.put_slice(value.as_bytes());
        buf.put_slice(CRLF);
    }

    buf.put_slice(CRLF);
}

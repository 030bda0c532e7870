//! Incremental HTTP/1.x parser.
//!
//! `parse` consumes as many whole syntactic units (method, target, version,
//! one header line) as the given bytes contain and returns how many bytes it
//! used. Zero means "feed me more", never an error. The caller keeps the
//! unconsumed tail and presents it again with new bytes appended, so feeding
//! a message one byte at a time yields the same head as feeding it whole.

use crate::error::{ProxyError, Result};
use crate::http::body::{BodyDecoder, BodyFraming, Decoded};
use crate::http::constants::{
    self, CONNECT, CR, DELETE, GET_WORD, HEAD, HTTP_10_WORD, HTTP_11_WORD, LF, MAX_METHOD_LEN,
    OPTIONS, PATCH, POST, PUT_WORD, PackedMethod, SP, TRACE,
};
use crate::http::headers::HeaderCollection;
use crate::http::method::{Method, Version};
use crate::http::request::{RequestHead, RequestStage, content_length};
use crate::http::response::{ResponseHead, ResponseStage};

/// Common interface for driving head parsing from a byte source.
pub trait HeadParser {
    fn parse(&mut self, data: &[u8]) -> Result<usize>;

    fn is_head_complete(&self) -> bool;
}

const PACKED_METHODS: [(PackedMethod, Method); 7] = [
    (CONNECT, Method::Connect),
    (OPTIONS, Method::Options),
    (DELETE, Method::Delete),
    (PATCH, Method::Patch),
    (TRACE, Method::Trace),
    (POST, Method::Post),
    (HEAD, Method::Head),
];

#[derive(Debug, Default)]
pub struct RequestParser {
    head: RequestHead,
    decoder: Option<BodyDecoder>,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> RequestStage {
        self.head.stage
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub fn parse(&mut self, mut data: &[u8]) -> Result<usize> {
        let mut consumed = 0;

        loop {
            let step = match self.head.stage {
                RequestStage::ParsingMethod => self.parse_method(data)?,
                RequestStage::ParsingRequestUri => self.parse_target(data)?,
                RequestStage::ParsingVersion => self.parse_version(data)?,
                RequestStage::ParsingHeader => self.parse_header(data)?,
                // body bytes go through `parse_body`
                _ => 0,
            };

            if step == 0 {
                return Ok(consumed);
            }

            consumed += step;
            data = &data[step..];
        }
    }

    /// Whether the request carries `Expect: 100-continue` and the interim
    /// reply has not been acknowledged yet.
    pub fn awaiting_continue(&self) -> bool {
        self.head.stage == RequestStage::HandlingExpect100Continue
    }

    /// Records that `100 Continue` went out and body reading may start.
    pub fn continue_sent(&mut self) {
        assert_eq!(
            self.head.stage,
            RequestStage::HandlingExpect100Continue,
            "no interim reply was pending"
        );
        self.start_body();
    }

    /// Decodes body bytes once the head is done.
    pub fn parse_body(&mut self, data: &[u8], max_payload: usize) -> Result<Decoded> {
        assert!(
            self.head.stage >= RequestStage::ReadingBody,
            "body read before the head was parsed (stage {:?})",
            self.head.stage
        );

        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(Decoded { consumed: 0, payload: 0..0 });
        };

        let decoded = decoder.decode(data, max_payload)?;
        if decoder.is_complete() {
            self.head.stage = RequestStage::MessageParsed;
        }
        Ok(decoded)
    }

    /// Splits the parsed head from the decoder for its body.
    pub fn into_parts(self) -> (RequestHead, BodyDecoder) {
        let decoder = self.decoder.unwrap_or(BodyDecoder::Done);
        (self.head, decoder)
    }

    fn parse_method(&mut self, data: &[u8]) -> Result<usize> {
        if let Some(first) = data.first_chunk::<4>() {
            match u32::from_le_bytes(*first) {
                GET_WORD => return Ok(self.set_method(Method::Get, 4)),
                PUT_WORD => return Ok(self.set_method(Method::Put, 4)),
                _ => {}
            }
        }

        if let Some(first) = data.first_chunk::<8>() {
            let word = u64::from_le_bytes(*first);
            for (packed, method) in &PACKED_METHODS {
                if word & packed.mask == packed.word {
                    return Ok(self.set_method(method.clone(), packed.len));
                }
            }
        }

        // Short input or a non-standard verb: scan for the terminating space.
        let window = &data[..data.len().min(MAX_METHOD_LEN + 1)];
        match window.iter().position(|&b| b == SP) {
            Some(0) => Err(ProxyError::malformed("empty method")),
            Some(n) => {
                let method = Method::from_token(&data[..n])
                    .ok_or_else(|| ProxyError::malformed("invalid method token"))?;
                Ok(self.set_method(method, n + 1))
            }
            None if window.len() > MAX_METHOD_LEN => {
                Err(ProxyError::malformed("method token too long"))
            }
            None if window.iter().any(|&b| !constants::is_tchar(b)) => {
                Err(ProxyError::malformed("invalid method token"))
            }
            None => Ok(0),
        }
    }

    fn set_method(&mut self, method: Method, consumed: usize) -> usize {
        self.head.is_tunnel = method == Method::Connect;
        self.head.method = method;
        self.head.stage = RequestStage::ParsingRequestUri;
        consumed
    }

    fn parse_target(&mut self, data: &[u8]) -> Result<usize> {
        let end = match data.iter().position(|&b| b == SP || b == CR || b == LF) {
            None => return Ok(0),
            Some(0) => return Err(ProxyError::malformed("empty request target")),
            Some(end) if data[end] != SP => {
                return Err(ProxyError::malformed("request line without version"));
            }
            Some(end) => end,
        };

        let target = &data[..end];
        if target.iter().any(|&b| !b.is_ascii_graphic()) {
            return Err(ProxyError::malformed("invalid byte in request target"));
        }

        // graphic ASCII is valid UTF-8
        self.head.target = String::from_utf8_lossy(target).into_owned();
        self.head.stage = RequestStage::ParsingVersion;
        Ok(end + 1)
    }

    fn parse_version(&mut self, data: &[u8]) -> Result<usize> {
        let (Some(word), Some(eol)) = (data.first_chunk::<8>(), data.get(8..10)) else {
            return Ok(0);
        };

        self.head.version = parse_version_word(word)?;
        if eol != constants::CRLF {
            return Err(ProxyError::malformed("expected CRLF after version"));
        }

        self.head.stage = RequestStage::ParsingHeader;
        Ok(10)
    }

    fn parse_header(&mut self, data: &[u8]) -> Result<usize> {
        match parse_header_line(data, &mut self.head.headers)? {
            HeaderLine::NeedMore => Ok(0),
            HeaderLine::Field(consumed) => Ok(consumed),
            HeaderLine::End(consumed) => {
                self.finish_head()?;
                Ok(consumed)
            }
        }
    }

    fn finish_head(&mut self) -> Result<()> {
        self.head.stage = RequestStage::HeadersParsed;

        let framing = if self.head.is_tunnel {
            BodyFraming::Empty
        } else if let Some(length) = content_length(&self.head.headers)? {
            BodyFraming::Length(length)
        } else if self.head.headers.has_token("Transfer-Encoding", "chunked") {
            BodyFraming::Chunked
        } else {
            BodyFraming::Empty
        };
        self.decoder = Some(BodyDecoder::new(framing));

        if self.head.headers.has_token("Expect", "100-continue") {
            self.head.stage = RequestStage::HandlingExpect100Continue;
        } else {
            self.start_body();
        }
        Ok(())
    }

    fn start_body(&mut self) {
        let complete = self.decoder.as_ref().is_none_or(BodyDecoder::is_complete);
        self.head.stage = if complete {
            RequestStage::MessageParsed
        } else {
            RequestStage::ReadingBody
        };
    }
}

impl HeadParser for RequestParser {
    fn parse(&mut self, data: &[u8]) -> Result<usize> {
        RequestParser::parse(self, data)
    }

    fn is_head_complete(&self) -> bool {
        self.head.stage >= RequestStage::HeadersParsed
    }
}

/// Parses an origin's status line, headers and body framing.
#[derive(Debug)]
pub struct ResponseParser {
    head: ResponseHead,
    request_method: Method,
    decoder: Option<BodyDecoder>,
}

impl ResponseParser {
    /// `request_method` decides whether a body follows (never after HEAD).
    pub fn new(request_method: Method) -> Self {
        Self {
            head: ResponseHead::default(),
            request_method,
            decoder: None,
        }
    }

    pub fn stage(&self) -> ResponseStage {
        self.head.stage
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    pub fn parse(&mut self, mut data: &[u8]) -> Result<usize> {
        let mut consumed = 0;

        loop {
            let step = match self.head.stage {
                ResponseStage::ParsingVersion => self.parse_version(data)?,
                ResponseStage::ParsingStatus => self.parse_status(data)?,
                ResponseStage::ParsingReason => self.parse_reason(data)?,
                ResponseStage::ParsingHeader => self.parse_header(data)?,
                _ => 0,
            };

            if step == 0 {
                return Ok(consumed);
            }

            consumed += step;
            data = &data[step..];
        }
    }

    /// A `1xx` reply other than `101` precedes the real response.
    pub fn is_interim(&self) -> bool {
        self.head.stage >= ResponseStage::HeadersParsed
            && (100..200).contains(&self.head.status)
            && self.head.status != 101
    }

    /// Drops an interim head so the next one can be parsed.
    pub fn reset(&mut self) {
        self.head = ResponseHead::default();
        self.decoder = None;
    }

    pub fn parse_body(&mut self, data: &[u8], max_payload: usize) -> Result<Decoded> {
        assert!(
            self.head.stage >= ResponseStage::ReadingBody,
            "body read before the head was parsed (stage {:?})",
            self.head.stage
        );

        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(Decoded { consumed: 0, payload: 0..0 });
        };

        let decoded = decoder.decode(data, max_payload)?;
        if decoder.is_complete() {
            self.head.stage = ResponseStage::MessageParsed;
        }
        Ok(decoded)
    }

    pub fn framing(&self) -> Result<BodyFraming> {
        let status = self.head.status;
        let headers = &self.head.headers;

        if self.request_method == Method::Head
            || (100..200).contains(&status)
            || status == 204
            || status == 304
            || (self.request_method == Method::Connect && (200..300).contains(&status))
        {
            return Ok(BodyFraming::Empty);
        }

        Ok(if let Some(length) = content_length(headers)? {
            BodyFraming::Length(length)
        } else if headers.has_token("Transfer-Encoding", "chunked") {
            BodyFraming::Chunked
        } else {
            BodyFraming::UntilClose
        })
    }

    pub fn into_parts(self) -> (ResponseHead, BodyDecoder) {
        let decoder = self.decoder.unwrap_or(BodyDecoder::Done);
        (self.head, decoder)
    }

    fn parse_version(&mut self, data: &[u8]) -> Result<usize> {
        let (Some(word), Some(&sep)) = (data.first_chunk::<8>(), data.get(8)) else {
            return Ok(0);
        };

        self.head.version = parse_version_word(word)?;
        if sep != SP {
            return Err(ProxyError::malformed("expected space after version"));
        }

        self.head.stage = ResponseStage::ParsingStatus;
        Ok(9)
    }

    fn parse_status(&mut self, data: &[u8]) -> Result<usize> {
        let Some(&[a, b, c, sep]) = data.first_chunk::<4>() else {
            return Ok(0);
        };

        if !(a.is_ascii_digit() && b.is_ascii_digit() && c.is_ascii_digit()) {
            return Err(ProxyError::malformed("expected a three digit status"));
        }
        self.head.status = [a, b, c]
            .iter()
            .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));

        self.head.stage = ResponseStage::ParsingReason;
        match sep {
            SP => Ok(4),
            // empty reason phrase; leave the CRLF for the reason stage
            CR => Ok(3),
            _ => Err(ProxyError::malformed("expected space after status")),
        }
    }

    fn parse_reason(&mut self, data: &[u8]) -> Result<usize> {
        let Some(eol) = find_crlf(data) else {
            return Ok(0);
        };

        let reason = &data[..eol];
        if reason.iter().any(|&b| b == CR || b == LF) {
            return Err(ProxyError::malformed("bare CR or LF in reason phrase"));
        }

        self.head.reason = String::from_utf8_lossy(reason).into_owned();
        self.head.stage = ResponseStage::ParsingHeader;
        Ok(eol + 2)
    }

    fn parse_header(&mut self, data: &[u8]) -> Result<usize> {
        match parse_header_line(data, &mut self.head.headers)? {
            HeaderLine::NeedMore => Ok(0),
            HeaderLine::Field(consumed) => Ok(consumed),
            HeaderLine::End(consumed) => {
                self.head.stage = ResponseStage::HeadersParsed;
                let decoder = BodyDecoder::new(self.framing()?);
                self.head.stage = if decoder.is_complete() {
                    ResponseStage::MessageParsed
                } else {
                    ResponseStage::ReadingBody
                };
                self.decoder = Some(decoder);
                Ok(consumed)
            }
        }
    }
}

impl HeadParser for ResponseParser {
    fn parse(&mut self, data: &[u8]) -> Result<usize> {
        ResponseParser::parse(self, data)
    }

    fn is_head_complete(&self) -> bool {
        self.head.stage >= ResponseStage::HeadersParsed
    }
}

fn parse_version_word(word: &[u8; 8]) -> Result<Version> {
    match u64::from_le_bytes(*word) {
        HTTP_10_WORD => Ok(Version::Http10),
        HTTP_11_WORD => Ok(Version::Http11),
        _ => Err(ProxyError::malformed("unsupported protocol version")),
    }
}

enum HeaderLine {
    NeedMore,
    Field(usize),
    End(usize),
}

fn parse_header_line(data: &[u8], headers: &mut HeaderCollection) -> Result<HeaderLine> {
    match data {
        [] | [CR] => return Ok(HeaderLine::NeedMore),
        [CR, LF, ..] => return Ok(HeaderLine::End(2)),
        [CR, _, ..] => return Err(ProxyError::malformed("expected LF after CR")),
        _ => {}
    }

    let Some(eol) = find_crlf(data) else {
        return Ok(HeaderLine::NeedMore);
    };
    let line = &data[..eol];

    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| ProxyError::malformed("header field without colon"))?;

    let name = &line[..colon];
    if name.is_empty() || !name.iter().all(|&b| constants::is_tchar(b)) {
        return Err(ProxyError::malformed("invalid header name"));
    }

    let mut value = &line[colon + 1..];
    if let [SP, rest @ ..] = value {
        value = rest;
    }
    if value.iter().any(|&b| b == CR || b == LF) {
        return Err(ProxyError::malformed("bare CR or LF in header value"));
    }

    let value = std::str::from_utf8(value)
        .map_err(|_| ProxyError::malformed("header value is not UTF-8"))?;

    headers.append_interned(constants::intern_header_name(name), value.to_string());
    Ok(HeaderLine::Field(eol + 2))
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == constants::CRLF)
}

/// Parses a complete request head from `buf`.
///
/// Returns `Ok(None)` when `buf` ends before the blank line.
pub fn parse_request_head(buf: &[u8]) -> Result<Option<(RequestHead, usize)>> {
    let mut parser = RequestParser::new();
    let consumed = parser.parse(buf)?;

    if !parser.is_head_complete() {
        return Ok(None);
    }

    let (head, _) = parser.into_parts();
    Ok(Some((head, consumed)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercase_methods_fall_back_to_custom() {
        let (head, _) = parse_request_head(b"get / HTTP/1.1\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.method(), &Method::Custom("get".into()));
    }

    #[test]
    fn garbage_before_space_is_rejected_early() {
        let mut parser = RequestParser::new();
        assert!(parser.parse(b"GE\x01").is_err());
    }

    #[test]
    fn header_line_needs_full_crlf() {
        let mut headers = HeaderCollection::new();
        assert!(matches!(
            parse_header_line(b"Host: a\r", &mut headers).unwrap(),
            HeaderLine::NeedMore
        ));
        assert!(headers.is_empty());
    }
}

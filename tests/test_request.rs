use tapline::ProxyError;
use tapline::http::headers::HeaderCollection;
use tapline::http::method::{Method, Version};
use tapline::http::parser::parse_request_head;
use tapline::http::request::{RequestBuilder, RequestStage};

fn head(raw: &[u8]) -> tapline::http::request::RequestHead {
    parse_request_head(raw).unwrap().unwrap().0
}

#[test]
fn test_request_header_retrieval() {
    let req = head(b"GET / HTTP/1.1\r\nHost: example.com\r\nContent-Type: application/json\r\n\r\n");

    assert_eq!(req.headers().get("host"), Some("example.com"));
    assert_eq!(req.headers().get("CONTENT-TYPE"), Some("application/json"));
    assert_eq!(req.headers().get("Missing"), None);
}

#[test]
fn test_request_content_length_parsing() {
    let req = head(b"POST /api HTTP/1.1\r\nContent-Length: 42\r\n\r\n");
    assert_eq!(req.content_length().unwrap(), Some(42));
}

#[test]
fn test_request_content_length_missing() {
    let req = head(b"GET / HTTP/1.1\r\n\r\n");
    assert_eq!(req.content_length().unwrap(), None);
    assert!(!req.is_chunked());
}

#[test]
fn test_request_content_length_invalid() {
    let err = parse_request_head(b"POST /api HTTP/1.1\r\nContent-Length: not-a-number\r\n\r\n").unwrap_err();
    assert!(matches!(err, ProxyError::Malformed(_)));
}

#[test]
fn test_request_content_length_digits_only() {
    for value in ["+11", "-1", "1_1", "0x10", " ", "99999999999999999999999"] {
        let raw = format!("POST /api HTTP/1.1\r\nContent-Length: {value}\r\n\r\n");
        let err = parse_request_head(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, ProxyError::Malformed(_)), "accepted {value:?}");
    }
}

#[test]
fn test_request_repeated_equal_content_length_is_accepted() {
    let req = head(b"POST / HTTP/1.1\r\nContent-Length: 7\r\nContent-Length: 7\r\n\r\n");
    assert_eq!(req.content_length().unwrap(), Some(7));
}

#[test]
fn test_request_chunked_detection() {
    let req = head(b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip, Chunked\r\n\r\n");
    assert!(req.is_chunked());
}

#[test]
fn test_request_http10_version() {
    let req = head(b"GET / HTTP/1.0\r\n\r\n");
    assert_eq!(req.version(), Version::Http10);
    assert_eq!(req.version().to_string(), "HTTP/1.0");
}

#[test]
fn test_request_method_display() {
    assert_eq!(Method::Get.to_string(), "GET");
    assert_eq!(Method::Options.to_string(), "OPTIONS");
    assert_eq!(Method::Custom("MKCOL".into()).to_string(), "MKCOL");
}

#[test]
fn test_request_builder() {
    let req = RequestBuilder::new()
        .method(Method::Connect)
        .target("example.com:443")
        .header("Host", "example.com:443")
        .build()
        .unwrap();

    assert_eq!(req.stage(), RequestStage::MessageParsed);
    assert!(req.is_tunnel());
    assert_eq!(req.version(), Version::Http11);
    assert_eq!(req.headers().get("Host"), Some("example.com:443"));
}

#[test]
fn test_request_builder_requires_method_and_target() {
    assert!(RequestBuilder::new().target("/").build().is_err());
    assert!(RequestBuilder::new().method(Method::Get).build().is_err());
}

#[test]
fn test_request_set_target_and_headers() {
    let mut req = head(b"GET http://example.com/a HTTP/1.1\r\nHost: example.com\r\n\r\n");
    req.set_target("/a");
    req.headers_mut().set("Host", "other.example");

    assert_eq!(req.target(), "/a");
    assert_eq!(req.headers().get_all("Host").count(), 1);
    assert_eq!(req.headers().get("Host"), Some("other.example"));
}

#[test]
fn test_header_collection_set_keeps_first_position() {
    let mut headers = HeaderCollection::new();
    headers.append("A", "1");
    headers.append("B", "2");
    headers.append("a", "3");
    headers.set("A", "9");

    let all: Vec<(&str, &str)> = headers.iter().collect();
    assert_eq!(all, [("A", "9"), ("B", "2")]);
}

#[test]
fn test_header_collection_remove_counts() {
    let mut headers = HeaderCollection::new();
    headers.append("Via", "1.1 a");
    headers.append("via", "1.1 b");
    headers.append("Host", "h");

    assert_eq!(headers.remove("VIA"), 2);
    assert_eq!(headers.len(), 1);
    assert!(!headers.contains("Via"));
}

#[test]
fn test_header_collection_tokens() {
    let mut headers = HeaderCollection::new();
    headers.append("Connection", "keep-alive, Upgrade");

    assert!(headers.has_token("connection", "upgrade"));
    assert!(!headers.has_token("connection", "close"));
}

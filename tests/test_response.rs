use tapline::http::constants::{bad_gateway_line, connection_established, continue_line};
use tapline::http::method::{Method, Version};
use tapline::http::parser::ResponseParser;
use tapline::http::response::{Response, ResponseBuilder, reason_phrase};
use tapline::http::writer::response_head_bytes;

#[test]
fn test_reason_phrases() {
    assert_eq!(reason_phrase(200), "OK");
    assert_eq!(reason_phrase(204), "No Content");
    assert_eq!(reason_phrase(404), "Not Found");
    assert_eq!(reason_phrase(502), "Bad Gateway");
    assert_eq!(reason_phrase(599), "");
}

#[test]
fn test_response_builder_basic() {
    let response = ResponseBuilder::new(200).body("Hello, World!").build();

    assert_eq!(response.head.status(), 200);
    assert_eq!(response.head.reason(), "OK");
    assert_eq!(&response.body[..], b"Hello, World!");
}

#[test]
fn test_response_builder_auto_content_length() {
    let response = ResponseBuilder::new(200).body("This is the body").build();
    assert_eq!(response.head.headers().get("Content-Length"), Some("16"));
}

#[test]
fn test_response_builder_preserves_custom_content_length() {
    let response = ResponseBuilder::new(200)
        .header("Content-Length", "999")
        .body("test")
        .build();

    assert_eq!(response.head.headers().get("Content-Length"), Some("999"));
    assert_eq!(response.head.headers().len(), 1);
}

#[test]
fn test_response_builder_custom_reason_and_version() {
    let response = ResponseBuilder::new(299)
        .reason("Whatever")
        .version(Version::Http10)
        .build();

    let wire = response_head_bytes(&response.head);
    assert_eq!(&wire[..], b"HTTP/1.0 299 Whatever\r\nContent-Length: 0\r\n\r\n");
}

#[test]
fn test_response_head_round_trip() {
    let raw = b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\nset-cookie: b=2\r\nContent-Length: 0\r\n\r\n";
    let mut parser = ResponseParser::new(Method::Get);
    assert_eq!(parser.parse(raw).unwrap(), raw.len());

    let wire = response_head_bytes(parser.head());
    assert_eq!(&wire[..], &raw[..]);
}

#[test]
fn test_bad_gateway_response() {
    let response = Response::bad_gateway(Version::Http11, "connection refused");

    assert_eq!(response.head.status(), 502);
    assert_eq!(response.head.headers().get("Connection"), Some("close"));
    assert!(String::from_utf8_lossy(&response.body).contains("connection refused"));
    assert_eq!(
        response.head.headers().get("Content-Length"),
        Some(response.body.len().to_string().as_str())
    );
}

#[test]
fn test_status_only_lines() {
    assert_eq!(continue_line(Version::Http11.as_bytes()), b"HTTP/1.1 100 Continue\r\n\r\n");
    assert_eq!(
        connection_established(Version::Http10.as_bytes()),
        b"HTTP/1.0 200 Connection Established\r\n\r\n"
    );
    assert_eq!(bad_gateway_line(Version::Http11.as_bytes()), b"HTTP/1.1 502 Bad Gateway\r\n\r\n");
}

#[test]
fn test_set_status_on_parsed_head() {
    let mut parser = ResponseParser::new(Method::Get);
    parser.parse(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").unwrap();

    let (mut head, _) = parser.into_parts();
    head.set_status(451, "Unavailable For Legal Reasons");
    head.headers_mut().append("X-Filtered", "yes");

    let wire = response_head_bytes(&head);
    assert!(wire.starts_with(b"HTTP/1.1 451 Unavailable For Legal Reasons\r\n"));
    assert!(wire.ends_with(b"X-Filtered: yes\r\n\r\n"));
}

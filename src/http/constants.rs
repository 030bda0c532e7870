//! Wire constants and the shared header-name cache.

use dashmap::DashMap;
use std::sync::{Arc, LazyLock};

pub const SP: u8 = b' ';
pub const CR: u8 = b'\r';
pub const LF: u8 = b'\n';
pub const CRLF: &[u8] = b"\r\n";
pub const HEADER_SEPARATOR: &[u8] = b": ";
pub const CHUNKED_TERMINATOR: &[u8] = b"0\r\n\r\n";

pub const HTTP_10: &[u8; 8] = b"HTTP/1.0";
pub const HTTP_11: &[u8; 8] = b"HTTP/1.1";

/// `HTTP/1.0` and `HTTP/1.1` read as little-endian words.
pub const HTTP_10_WORD: u64 = u64::from_le_bytes(*HTTP_10);
pub const HTTP_11_WORD: u64 = u64::from_le_bytes(*HTTP_11);

/// A method token followed by its space, packed into the low bytes of a
/// little-endian word, with the mask selecting those bytes.
#[derive(Debug, Clone, Copy)]
pub struct PackedMethod {
    pub word: u64,
    pub mask: u64,
    pub len: usize,
}

const fn pack(token: &[u8]) -> PackedMethod {
    let mut bytes = [0u8; 8];
    let mut i = 0;
    while i < token.len() {
        bytes[i] = token[i];
        i += 1;
    }

    let mask = if token.len() == 8 {
        u64::MAX
    } else {
        (1u64 << (token.len() * 8)) - 1
    };

    PackedMethod {
        word: u64::from_le_bytes(bytes),
        mask,
        len: token.len(),
    }
}

pub const GET_WORD: u32 = u32::from_le_bytes(*b"GET ");
pub const PUT_WORD: u32 = u32::from_le_bytes(*b"PUT ");

pub const POST: PackedMethod = pack(b"POST ");
pub const HEAD: PackedMethod = pack(b"HEAD ");
pub const TRACE: PackedMethod = pack(b"TRACE ");
pub const PATCH: PackedMethod = pack(b"PATCH ");
pub const DELETE: PackedMethod = pack(b"DELETE ");
pub const CONNECT: PackedMethod = pack(b"CONNECT ");
pub const OPTIONS: PackedMethod = pack(b"OPTIONS ");

/// Longest method token accepted by the custom-method fallback.
pub const MAX_METHOD_LEN: usize = 32;

/// Header names retained by the interning cache.
const NAME_CACHE_LIMIT: usize = 1024;

static HEADER_NAMES: LazyLock<DashMap<Box<[u8]>, Arc<str>>> = LazyLock::new(DashMap::new);

/// Returns the shared spelling for a header name.
///
/// `name` must already be validated as an ASCII token. Spellings are kept
/// exactly as seen so re-emission is byte-exact.
pub fn intern_header_name(name: &[u8]) -> Arc<str> {
    if let Some(hit) = HEADER_NAMES.get(name) {
        return hit.clone();
    }

    let fresh: Arc<str> = Arc::from(String::from_utf8_lossy(name).as_ref());

    if HEADER_NAMES.len() >= NAME_CACHE_LIMIT {
        return fresh;
    }

    HEADER_NAMES
        .entry(name.into())
        .or_insert(fresh)
        .value()
        .clone()
}

/// `HTTP/x.y 100 Continue` followed by the blank line ending the interim head.
pub fn continue_line(version: &[u8; 8]) -> Vec<u8> {
    status_only(version, b"100 Continue")
}

pub fn connection_established(version: &[u8; 8]) -> Vec<u8> {
    status_only(version, b"200 Connection Established")
}

pub fn bad_gateway_line(version: &[u8; 8]) -> Vec<u8> {
    status_only(version, b"502 Bad Gateway")
}

fn status_only(version: &[u8; 8], status: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(version.len() + status.len() + 5);
    line.extend_from_slice(version);
    line.push(SP);
    line.extend_from_slice(status);
    line.extend_from_slice(CRLF);
    line.extend_from_slice(CRLF);
    line
}

/// Token characters allowed in methods and header names.
pub fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~'
    ) || b.is_ascii_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_masks_cover_token_and_space() {
        assert_eq!(POST.len, 5);
        assert_eq!(POST.mask, 0xFF_FFFF_FFFF);
        assert_eq!(CONNECT.mask, u64::MAX);

        let word = u64::from_le_bytes(*b"DELETE /");
        assert_eq!(word & DELETE.mask, DELETE.word);
    }

    #[test]
    fn interned_names_are_shared() {
        let a = intern_header_name(b"X-Interned");
        let b = intern_header_name(b"X-Interned");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(&*a, "X-Interned");
    }

    #[test]
    fn status_lines_end_the_head() {
        assert_eq!(continue_line(HTTP_11), b"HTTP/1.1 100 Continue\r\n\r\n");
        assert_eq!(bad_gateway_line(HTTP_10), b"HTTP/1.0 502 Bad Gateway\r\n\r\n");
    }
}

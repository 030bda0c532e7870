use std::fmt;

/// HTTP request methods.
///
/// The nine standard verbs are recognized from packed prefixes by the parser;
/// any other token terminated by a space becomes [`Method::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
    Head,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
    /// Any other token, kept verbatim
    Custom(String),
}

impl Method {
    /// Parses a method token.
    ///
    /// Matching is case-sensitive; a lowercase `get` is a custom method.
    ///
    /// # Example
    ///
    /// ```
    /// # use tapline::http::method::Method;
    /// assert_eq!(Method::from_token(b"GET"), Some(Method::Get));
    /// assert_eq!(Method::from_token(b"PURGE"), Some(Method::Custom("PURGE".into())));
    /// assert_eq!(Method::from_token(b"BAD METHOD"), None);
    /// ```
    pub fn from_token(token: &[u8]) -> Option<Self> {
        let method = match token {
            b"GET" => Method::Get,
            b"PUT" => Method::Put,
            b"POST" => Method::Post,
            b"HEAD" => Method::Head,
            b"DELETE" => Method::Delete,
            b"CONNECT" => Method::Connect,
            b"OPTIONS" => Method::Options,
            b"TRACE" => Method::Trace,
            b"PATCH" => Method::Patch,
            _ => {
                if token.is_empty() || !token.iter().all(|&b| super::constants::is_tchar(b)) {
                    return None;
                }
                // tchar is a subset of ASCII
                Method::Custom(String::from_utf8_lossy(token).into_owned())
            }
        };

        Some(method)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
            Method::Custom(token) => token,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol versions accepted on the byte-level path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_bytes(&self) -> &'static [u8; 8] {
        match self {
            Version::Http10 => super::constants::HTTP_10,
            Version::Http11 => super::constants::HTTP_11,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        })
    }
}

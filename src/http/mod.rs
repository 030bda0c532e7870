//! HTTP/1.x wire handling.
//!
//! - **`parser`**: incremental request and response parsers
//! - **`body`**: fixed-length, chunked and read-until-close body framing
//! - **`headers`**: the case-insensitive header multi-map
//! - **`request`** / **`response`**: message heads with stage-guarded fields
//! - **`writer`**: serialization of heads back onto the wire
//! - **`constants`**: packed method words, versions, status lines and the
//!   header-name cache
//!
//! # Request parser stages
//!
//! ```text
//!   ParsingMethod → ParsingRequestUri → ParsingVersion
//!          → ParsingHeader ⟲ (one field per pass)
//!          → HeadersParsed
//!          → [HandlingExpect100Continue]   (until `100 Continue` is sent)
//!          → ReadingBody
//!          → MessageParsed
//! ```

pub mod body;
pub mod constants;
pub mod headers;
pub mod method;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;

//! Minimal HTTP/1.0 response parser for the stream transport.
//!
//! Only enough of HTTP/1.0 to pull a status code and `Content-Length` out
//! of a reply is implemented. Anything else (chunked encoding, other
//! headers, HTTP/1.1) is out of scope — the stream transport falls back to
//! the datagram transport rather than handle it.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse<'a> {
    pub status: u16,
    pub reason: &'a str,
    pub content_length: Option<u64>,
    /// Byte offset of the first body byte within the input buffer.
    pub body_offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("no header terminator (\\r\\n\\r\\n or \\n\\n) found yet")]
    Incomplete,
    #[error("response does not start with \"HTTP/1.0 \"")]
    BadStatusLine,
    #[error("status line has no 3-digit status code")]
    BadStatusCode,
}

/// Finds the end of the header block, if present. Tolerates embedded NUL
/// bytes in the header region by treating them as ordinary bytes rather
/// than erroring — some peers send telnet-style keepalive NULs.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    if let Some(pos) = find_subslice(buf, b"\r\n\r\n") {
        return Some(pos + 4);
    }
    find_subslice(buf, b"\n\n").map(|pos| pos + 2)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parses a minimal HTTP/1.0 response out of `buf`. `buf` need not be
/// exactly the header block — any body bytes already read past the
/// terminator are tolerated and reflected in `body_offset`.
pub fn parse_response(buf: &[u8]) -> Result<ParsedResponse<'_>, ParseError> {
    let header_end = find_header_end(buf).ok_or(ParseError::Incomplete)?;
    let header = &buf[..header_end];

    const PREFIX: &[u8] = b"HTTP/1.0 ";
    if header.len() < PREFIX.len() + 4 || !header[..PREFIX.len()].eq_ignore_ascii_case(PREFIX) {
        return Err(ParseError::BadStatusLine);
    }
    let after_prefix = &header[PREFIX.len()..];
    if after_prefix.len() < 4
        || !after_prefix[..3].iter().all(u8::is_ascii_digit)
        || after_prefix[3] != b' '
    {
        return Err(ParseError::BadStatusCode);
    }
    let status: u16 = std::str::from_utf8(&after_prefix[..3])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(ParseError::BadStatusCode)?;

    let line_end = find_subslice(after_prefix, b"\n")
        .map(|p| p + PREFIX.len())
        .unwrap_or(header.len());
    let reason_start = PREFIX.len() + 4;
    let reason_bytes = &header[reason_start.min(line_end)..line_end];
    let reason = std::str::from_utf8(reason_bytes)
        .unwrap_or("")
        .trim_end_matches(['\r', '\n']);

    let content_length = find_content_length(header);

    Ok(ParsedResponse {
        status,
        reason,
        content_length,
        body_offset: header_end,
    })
}

/// Case-insensitive scan for `Content-Length:` followed by optional spaces
/// and a decimal integer terminated by CR or LF.
fn find_content_length(header: &[u8]) -> Option<u64> {
    const NEEDLE: &[u8] = b"content-length:";
    let lower: Vec<u8> = header.iter().map(u8::to_ascii_lowercase).collect();
    let pos = find_subslice(&lower, NEEDLE)?;
    let mut rest = &header[pos + NEEDLE.len()..];
    while rest.first() == Some(&b' ') {
        rest = &rest[1..];
    }
    let digits_end = rest
        .iter()
        .position(|b| *b == b'\r' || *b == b'\n')
        .unwrap_or(rest.len());
    let digits = &rest[..digits_end];
    std::str::from_utf8(digits).ok()?.trim().parse().ok()
}

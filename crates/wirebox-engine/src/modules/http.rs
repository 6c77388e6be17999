#![forbid(unsafe_code)]

//! Minimal HTTP/1.1 wire helpers shared by the server and browser modules.

use std::collections::BTreeMap;

/// Byte offset just past the `\r\n\r\n` header terminator, if present.
pub fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Splits `Name: value` header lines into a map. Names are lowercased so
/// lookups are case-insensitive; malformed lines are skipped.
pub fn parse_headers(lines: &str) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    for line in lines.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    headers
}

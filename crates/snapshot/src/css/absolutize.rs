//! `url(...)` absolutization for recorded stylesheet text.
//!
//! A single forward scan: find a literal `url(`, then take either a quoted
//! value closed by the same quote directly followed by `)`, or everything up
//! to the first `)`. Delimiter lookups are memoized per delimiter so that
//! unterminated input cannot make the scan revisit the tail.

use memchr::{memchr, memmem};

/// Rewrite every relative `url(...)` in `css` against `base_href`.
pub fn absolutize_urls(css: &str, base_href: &str) -> String {
    let bytes = css.as_bytes();
    let finder = memmem::Finder::new(b"url(");
    let mut close_paren = NextByte::new(b')');
    let mut single = NextByte::new(b'\'');
    let mut double = NextByte::new(b'"');

    let mut out = String::with_capacity(css.len());
    let mut copied = 0;
    let mut pos = 0;

    while let Some(found) = finder.find(&bytes[pos..]) {
        let start = pos + found;
        let value_start = start + 4;

        let token = match bytes.get(value_start) {
            Some(&q @ (b'\'' | b'"')) => {
                let lookup = if q == b'\'' { &mut single } else { &mut double };
                lookup
                    .find(bytes, value_start + 1)
                    .filter(|&close| bytes.get(close + 1) == Some(&b')'))
                    .map(|close| UrlToken {
                        quote: if q == b'\'' { "'" } else { "\"" },
                        path: &css[value_start + 1..close],
                        end: close + 2,
                    })
                    .or_else(|| unquoted(css, &mut close_paren, value_start))
            }
            _ => unquoted(css, &mut close_paren, value_start),
        };

        let Some(token) = token else {
            // no `)` anywhere after this point; nothing further can match
            break;
        };

        if let Some(rewritten) = rewrite_path(token.path, base_href) {
            out.push_str(&css[copied..start]);
            out.push_str("url(");
            out.push_str(token.quote);
            out.push_str(&rewritten);
            out.push_str(token.quote);
            out.push(')');
            copied = token.end;
        }
        pos = token.end;
    }

    out.push_str(&css[copied..]);
    out
}

struct UrlToken<'a> {
    quote: &'static str,
    path: &'a str,
    /// Byte offset just past the closing `)`.
    end: usize,
}

fn unquoted<'a>(css: &'a str, close_paren: &mut NextByte, value_start: usize) -> Option<UrlToken<'a>> {
    let close = close_paren.find(css.as_bytes(), value_start)?;
    Some(UrlToken {
        quote: "",
        path: &css[value_start..close],
        end: close + 1,
    })
}

/// Memoized "next occurrence of a byte at or after `from`".
///
/// Queries must come with non-decreasing `from`, which the forward scan
/// guarantees per delimiter, so each delimiter costs one pass overall.
struct NextByte {
    byte: u8,
    cached: Option<usize>,
    exhausted: bool,
}

impl NextByte {
    fn new(byte: u8) -> Self {
        Self {
            byte,
            cached: None,
            exhausted: false,
        }
    }

    fn find(&mut self, haystack: &[u8], from: usize) -> Option<usize> {
        if self.exhausted {
            return None;
        }
        if let Some(hit) = self.cached {
            if hit >= from {
                return Some(hit);
            }
        }
        match haystack.get(from..).and_then(|tail| memchr(self.byte, tail)) {
            Some(offset) => {
                self.cached = Some(from + offset);
                self.cached
            }
            None => {
                self.exhausted = true;
                None
            }
        }
    }
}

/// New path for a relative reference, `None` when it must stay as is.
fn rewrite_path(path: &str, base_href: &str) -> Option<String> {
    if path.is_empty() || is_absolute_like(path) || is_data_uri(path) {
        return None;
    }
    if path.starts_with('/') {
        return Some(format!("{}{}", extract_origin(base_href), path));
    }

    let mut stack: Vec<&str> = base_href.split('/').collect();
    stack.pop();
    for part in path.split('/') {
        match part {
            "." => {}
            ".." => {
                stack.pop();
            }
            _ => stack.push(part),
        }
    }
    Some(stack.join("/"))
}

/// `scheme://`, protocol-relative `//` or a bare `www.` host.
fn is_absolute_like(path: &str) -> bool {
    let bytes = path.as_bytes();
    let scheme_len = bytes
        .iter()
        .take_while(|b| b.is_ascii_alphabetic() || **b == b'+')
        .count();
    let rest = if scheme_len > 0 && bytes.get(scheme_len) == Some(&b':') {
        &bytes[scheme_len + 1..]
    } else {
        bytes
    };
    rest.starts_with(b"//")
        || bytes
            .get(..4)
            .is_some_and(|p| p.eq_ignore_ascii_case(b"www."))
}

fn is_data_uri(path: &str) -> bool {
    path.get(..5)
        .is_some_and(|p| p.eq_ignore_ascii_case("data:"))
        && path.contains(',')
}

/// `scheme://host[:port]` of `href`, without any query string.
fn extract_origin(href: &str) -> &str {
    let end = if href.contains("//") {
        href.match_indices('/')
            .nth(2)
            .map_or(href.len(), |(i, _)| i)
    } else {
        href.find('/').unwrap_or(href.len())
    };
    let origin = &href[..end];
    origin.split('?').next().unwrap_or(origin)
}

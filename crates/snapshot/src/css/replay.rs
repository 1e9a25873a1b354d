//! Stylesheet adaptation for a replica that has no pointer and no device.
//!
//! Two rewrites, everything else is copied byte for byte:
//! - every selector using `:hover` gains a twin using the `.\:hover` class,
//!   so a replayer can emulate hover by toggling a class;
//! - `min-device-*` / `max-device-*` media features become viewport
//!   features.
//!
//! Input that cannot be scanned (unterminated comment, string or block) is
//! returned unchanged.

use std::collections::HashMap;
use thiserror::Error;

/// Memo of adapted stylesheet text, keyed by the original text.
#[derive(Debug, Default)]
pub struct BuildCache {
    styles_with_hover_class: HashMap<String, String>,
}

impl BuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.styles_with_hover_class.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles_with_hover_class.is_empty()
    }

    pub fn clear(&mut self) {
        self.styles_with_hover_class.clear();
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CssScanError {
    #[error("unterminated comment at byte {0}")]
    UnterminatedComment(usize),
    #[error("unterminated string at byte {0}")]
    UnterminatedString(usize),
    #[error("unterminated block at byte {0}")]
    UnterminatedBlock(usize),
}

pub fn adapt_css_for_replay(css: &str, cache: &mut BuildCache) -> String {
    if let Some(cached) = cache.styles_with_hover_class.get(css) {
        return cached.clone();
    }
    let result = match adapt(css) {
        Ok(adapted) => adapted,
        Err(err) => {
            log::warn!(target: "snapshot.css", "failed to adapt css for replay: {err}");
            css.to_string()
        }
    };
    cache
        .styles_with_hover_class
        .insert(css.to_string(), result.clone());
    result
}

pub(crate) fn adapt(css: &str) -> Result<String, CssScanError> {
    let mut scanner = Scanner {
        src: css,
        bytes: css.as_bytes(),
        pos: 0,
        out: String::with_capacity(css.len()),
    };
    scanner.rule_list(false)?;
    Ok(scanner.out)
}

// At-rules whose block holds further rules.
const GROUPING_RULES: &[&str] = &[
    "media",
    "supports",
    "document",
    "-moz-document",
    "layer",
    "container",
    "scope",
];

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    out: String,
}

impl Scanner<'_> {
    fn rule_list(&mut self, nested: bool) -> Result<(), CssScanError> {
        loop {
            self.copy_trivia()?;
            match self.bytes.get(self.pos) {
                None if nested => return Err(CssScanError::UnterminatedBlock(self.pos)),
                None => return Ok(()),
                // the caller consumes the closing brace
                Some(b'}') if nested => return Ok(()),
                Some(b'}') => {
                    self.out.push('}');
                    self.pos += 1;
                }
                Some(b'@') => self.at_rule()?,
                Some(_) => self.qualified_rule()?,
            }
        }
    }

    fn at_rule(&mut self) -> Result<(), CssScanError> {
        let start = self.pos;
        let name_end = self.bytes[start + 1..]
            .iter()
            .position(|b| !(b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_'))
            .map_or(self.bytes.len(), |i| start + 1 + i);
        let name = self.src[start + 1..name_end].to_ascii_lowercase();
        let (end, delim) = self.prelude_end(name_end)?;
        self.out
            .push_str(&rewrite_device_features(&self.src[start..end]));

        match delim {
            Some(b'{') => {
                self.out.push('{');
                self.pos = end + 1;
                if GROUPING_RULES.contains(&name.as_str()) {
                    self.rule_list(true)?;
                    self.out.push('}');
                    self.pos += 1;
                } else {
                    self.copy_block()?;
                }
            }
            Some(b';') => {
                self.out.push(';');
                self.pos = end + 1;
            }
            _ => self.pos = end,
        }
        Ok(())
    }

    fn qualified_rule(&mut self) -> Result<(), CssScanError> {
        let start = self.pos;
        let (end, delim) = self.prelude_end(start)?;
        match delim {
            Some(b'{') => {
                let prelude = &self.src[start..end];
                let selector = prelude.trim_end();
                self.out.push_str(&add_hover_selectors(selector));
                self.out.push_str(&prelude[selector.len()..]);
                self.out.push('{');
                self.pos = end + 1;
                self.copy_block()
            }
            Some(b';') => {
                self.out.push_str(&self.src[start..=end]);
                self.pos = end + 1;
                Ok(())
            }
            _ => {
                self.out.push_str(&self.src[start..end]);
                self.pos = end;
                Ok(())
            }
        }
    }

    /// Copy whitespace and comments.
    fn copy_trivia(&mut self) -> Result<(), CssScanError> {
        let start = self.pos;
        loop {
            match self.bytes.get(self.pos) {
                Some(b) if b.is_ascii_whitespace() => self.pos += 1,
                Some(b'/') if self.bytes.get(self.pos + 1) == Some(&b'*') => {
                    self.pos = self.skip_comment(self.pos)?;
                }
                _ => break,
            }
        }
        self.out.push_str(&self.src[start..self.pos]);
        Ok(())
    }

    /// Copy a block body through its matching `}`. `self.pos` is just past
    /// the opening brace.
    fn copy_block(&mut self) -> Result<(), CssScanError> {
        let open = self.pos;
        let mut depth = 1usize;
        let mut i = self.pos;
        while depth > 0 {
            match self.bytes.get(i) {
                None => return Err(CssScanError::UnterminatedBlock(open)),
                Some(b'{') => {
                    depth += 1;
                    i += 1;
                }
                Some(b'}') => {
                    depth -= 1;
                    i += 1;
                }
                Some(_) => i = self.skip_atom(i)?,
            }
        }
        self.out.push_str(&self.src[open..i]);
        self.pos = i;
        Ok(())
    }

    /// Offset of the `{`, `;` or `}` ending a prelude, skipping nested
    /// parentheses, brackets, strings and comments.
    fn prelude_end(&self, from: usize) -> Result<(usize, Option<u8>), CssScanError> {
        let mut depth = 0usize;
        let mut i = from;
        loop {
            match self.bytes.get(i) {
                None => return Ok((i, None)),
                Some(b'(' | b'[') => {
                    depth += 1;
                    i += 1;
                }
                Some(b')' | b']') => {
                    depth = depth.saturating_sub(1);
                    i += 1;
                }
                Some(&b @ (b'{' | b';' | b'}')) if depth == 0 => return Ok((i, Some(b))),
                Some(_) => i = self.skip_atom(i)?,
            }
        }
    }

    /// Index just past the string, comment, escape or single byte at `i`.
    fn skip_atom(&self, i: usize) -> Result<usize, CssScanError> {
        match self.bytes[i] {
            b'"' | b'\'' => self.skip_string(i),
            b'/' if self.bytes.get(i + 1) == Some(&b'*') => self.skip_comment(i),
            b'\\' => Ok((i + 2).min(self.bytes.len())),
            _ => Ok(i + 1),
        }
    }

    fn skip_string(&self, start: usize) -> Result<usize, CssScanError> {
        let quote = self.bytes[start];
        let mut i = start + 1;
        while let Some(&b) = self.bytes.get(i) {
            if b == b'\\' {
                i += 2;
            } else if b == quote {
                return Ok(i + 1);
            } else {
                i += 1;
            }
        }
        Err(CssScanError::UnterminatedString(start))
    }

    fn skip_comment(&self, start: usize) -> Result<usize, CssScanError> {
        memchr::memmem::find(&self.bytes[start + 2..], b"*/")
            .map(|offset| start + 2 + offset + 2)
            .ok_or(CssScanError::UnterminatedComment(start))
    }
}

// input: "a:hover, b"
// output: "a:hover, b,\na.\:hover"
fn add_hover_selectors(selector: &str) -> String {
    let mut out = selector.to_string();
    if !selector.contains(":hover") {
        return out;
    }
    for part in split_selector_list(selector) {
        let part = part.trim();
        if part.contains(":hover") {
            out.push_str(",\n");
            out.push_str(&part.replace(":hover", ".\\:hover"));
        }
    }
    out
}

// Top-level comma split; commas inside :is(...), [attr="a,b"] stay put.
fn split_selector_list(selector: &str) -> Vec<&str> {
    let bytes = selector.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) if b == b'\\' => i += 1,
            Some(_) => {}
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'(' | b'[' => depth += 1,
                b')' | b']' => depth = depth.saturating_sub(1),
                b'\\' => i += 1,
                b',' if depth == 0 => {
                    parts.push(&selector[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
        i += 1;
    }
    parts.push(&selector[start..]);
    parts
}

// input: "screen and (max-device-width: 600px)"
// output: "screen and (max-width: 600px)"
fn rewrite_device_features(prelude: &str) -> String {
    const NEEDLE: &str = "-device-";
    let mut out = String::with_capacity(prelude.len());
    let mut copied = 0;
    for (at, _) in prelude.match_indices(NEEDLE) {
        let prefix = prelude.get(at.saturating_sub(3)..at);
        let rest = &prelude[at + NEEDLE.len()..];
        if at >= 3
            && matches!(prefix, Some("max" | "min"))
            && (rest.starts_with("width") || rest.starts_with("height"))
        {
            out.push_str(&prelude[copied..at]);
            out.push('-');
            copied = at + NEEDLE.len();
        }
    }
    out.push_str(&prelude[copied..]);
    out
}

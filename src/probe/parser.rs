//! Byte-level parser for `match` directives
//!
//! Grammar: `match <proto> m<D>PATTERN<D>[opts] META...` where `<D>` is an
//! arbitrary single-byte delimiter picked by the directive, the options are
//! single letters, and each metadata block is `<tag><D2>VALUE<D2>` with its
//! own delimiter. The pattern may contain whitespace and the letter `m`.

use thiserror::Error;

/// Errors aborting a single directive; the surrounding file continues
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("missing probe identifier")]
    MissingIdent,

    #[error("expected 'm' to introduce the pattern: {0}")]
    InvalidFormat(String),

    #[error("missing pattern delimiter")]
    MissingDelimiter,

    #[error("unterminated pattern (delimiter {0:?} not closed)")]
    UnterminatedPattern(char),

    #[error("unterminated metadata block for tag {0:?}")]
    UnterminatedMeta(char),
}

/// Structured form of one `match` directive
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MatchDirective {
    pub ident: String,

    /// Raw pattern bytes between the delimiters
    pub pattern: Vec<u8>,

    /// `i` option: case-insensitive matching
    pub case_insensitive: bool,

    /// `s` option: `.` also matches newlines
    pub include_newlines: bool,

    pub vendor: String,
    pub version: String,
    pub info: String,
    pub hostname: String,
    pub os: String,
    pub device_type: String,
}

/// Parse a single `match` line into a directive
pub fn parse_match(line: &str) -> Result<MatchDirective, ParseError> {
    let ident = line
        .split_whitespace()
        .nth(1)
        .ok_or(ParseError::MissingIdent)?
        .to_string();

    let mut directive = MatchDirective {
        ident,
        ..Default::default()
    };

    let bytes = line.as_bytes();
    let mut i = 0;

    // header: skip the keyword and the identifier, counting whitespace runs
    let mut space_runs = 0;
    let mut prev_space = false;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            if !prev_space {
                space_runs += 1;
            }
            prev_space = true;
            i += 1;
            continue;
        }
        prev_space = false;
        if space_runs >= 2 {
            break;
        }
        i += 1;
    }

    if i >= bytes.len() || bytes[i] != b'm' {
        return Err(ParseError::InvalidFormat(line.to_string()));
    }
    i += 1;

    let delim = *bytes.get(i).ok_or(ParseError::MissingDelimiter)?;
    i += 1;

    // pattern body: everything up to the next delimiter byte, whitespace included
    let start = i;
    while i < bytes.len() && bytes[i] != delim {
        i += 1;
    }
    if i >= bytes.len() {
        return Err(ParseError::UnterminatedPattern(delim as char));
    }
    directive.pattern = bytes[start..i].to_vec();
    i += 1;

    // options: single letters up to the next whitespace
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
        match bytes[i] {
            b'i' => directive.case_insensitive = true,
            b's' => directive.include_newlines = true,
            _ => {}
        }
        i += 1;
    }

    // metadata blocks
    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let tag = bytes[i];
        i += 1;

        // CPE values carry their own sub-grammar and end metadata parsing
        if tag == b'c' {
            break;
        }

        let value_delim = match bytes.get(i) {
            Some(&b) => b,
            None => return Err(ParseError::UnterminatedMeta(tag as char)),
        };
        i += 1;

        let value_start = i;
        while i < bytes.len() && bytes[i] != value_delim {
            i += 1;
        }
        if i >= bytes.len() {
            return Err(ParseError::UnterminatedMeta(tag as char));
        }
        let value = String::from_utf8_lossy(&bytes[value_start..i]).into_owned();
        i += 1;

        match tag {
            b'p' => directive.vendor = value,
            b'v' => directive.version = value,
            b'i' => directive.info = value,
            b'h' => directive.hostname = value,
            b'o' => directive.os = value,
            b'd' => directive.device_type = value,
            _ => {}
        }
    }

    Ok(directive)
}

//! YAML encoding with a configurable indent
//!
//! `serde_yaml` always indents nested blocks by two spaces. Wider indents are
//! produced by rescaling the leading whitespace of each emitted line.

use anyhow::{Result, bail};
use serde::Serialize;

pub const DEFAULT_INDENT: usize = 2;
pub const MIN_INDENT: usize = 2;
pub const MAX_INDENT: usize = 9;

/// Encode `value` with the default two-space indent
pub fn marshal<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    marshal_with_indent(value, DEFAULT_INDENT)
}

/// Encode `value` indenting nested blocks by `indent` spaces (2..=9)
pub fn marshal_with_indent<T: Serialize + ?Sized>(value: &T, indent: usize) -> Result<String> {
    if !(MIN_INDENT..=MAX_INDENT).contains(&indent) {
        bail!(
            "indent must be between {} and {}, got {}",
            MIN_INDENT,
            MAX_INDENT,
            indent
        );
    }
    let encoded = serde_yaml::to_string(value)?;
    if indent == DEFAULT_INDENT {
        return Ok(encoded);
    }
    Ok(reindent(&encoded, indent))
}

fn reindent(encoded: &str, indent: usize) -> String {
    let mut out = String::with_capacity(encoded.len());
    for line in encoded.split_inclusive('\n') {
        let leading = line.len() - line.trim_start_matches(' ').len();
        let levels = leading / DEFAULT_INDENT;
        let remainder = leading % DEFAULT_INDENT;
        out.push_str(&" ".repeat(levels * indent + remainder));
        out.push_str(&line[leading..]);
    }
    out
}

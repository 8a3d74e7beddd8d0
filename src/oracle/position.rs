//! Column and URI conversions between tree-sitter and the language server

use std::path::{Path, PathBuf};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters escaped in the path part of a `file://` URI
const PATH_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Text of line `row` without its line terminator
pub fn line_text(source: &str, row: usize) -> Option<&str> {
    source
        .split('\n')
        .nth(row)
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
}

/// UTF-16 column of a byte offset within a line
pub fn byte_to_utf16_column(line: &str, byte_column: usize) -> u32 {
    let mut units = 0u32;
    for (offset, ch) in line.char_indices() {
        if offset >= byte_column {
            break;
        }
        units += ch.len_utf16() as u32;
    }
    units
}

/// Byte offset of a UTF-16 column within a line, clamped to the line length
pub fn utf16_to_byte_column(line: &str, utf16_column: u32) -> usize {
    let mut units = 0u32;
    for (offset, ch) in line.char_indices() {
        if units >= utf16_column {
            return offset;
        }
        units += ch.len_utf16() as u32;
    }
    line.len()
}

pub fn path_to_uri(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let encoded = utf8_percent_encode(&raw, PATH_SET).to_string();
    if encoded.starts_with('/') {
        format!("file://{}", encoded)
    } else {
        format!("file:///{}", encoded)
    }
}

/// Local path of a `file:` URI; `None` for any other scheme
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix("file://")?;
    let rest = rest.strip_prefix("localhost").unwrap_or(rest);
    let decoded = percent_decode_str(rest).decode_utf8().ok()?;
    Some(PathBuf::from(decoded.into_owned()))
}

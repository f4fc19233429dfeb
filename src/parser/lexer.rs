//! Byte-level scanning shared by the splitter, rewriter and tokenizer

pub(super) fn is_identifier_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// `-- ` starts a comment only when followed by whitespace or end of input
pub(super) fn is_dash_comment(bytes: &[u8], i: usize) -> bool {
    bytes.get(i + 1) == Some(&b'-')
        && bytes
            .get(i + 2)
            .map_or(true, |b| b.is_ascii_whitespace())
}

/// Index just past the closing quote (or end of input)
pub(super) fn skip_quoted(bytes: &[u8], open: usize, quote: u8) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        if bytes[i] == b'\\' && quote != b'`' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Index just past the end of the line containing `from`
pub(super) fn skip_line(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |pos| from + pos + 1)
}

pub(super) fn skip_block_comment(bytes: &[u8], from: usize) -> usize {
    let mut i = from + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

/// Start of a `-- ` or `#` comment that runs to the end of `sql`
pub(super) fn trailing_line_comment(sql: &str) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => i = skip_quoted(bytes, i, quote),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'-' if is_dash_comment(bytes, i) => match bytes[i..].iter().position(|&b| b == b'\n') {
                Some(pos) => i += pos + 1,
                None => return Some(i),
            },
            b'#' => match bytes[i..].iter().position(|&b| b == b'\n') {
                Some(pos) => i += pos + 1,
                None => return Some(i),
            },
            _ => i += 1,
        }
    }
    None
}

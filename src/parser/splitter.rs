use super::lexer::{is_dash_comment, skip_block_comment, skip_line, skip_quoted};

/// Marker that turns the rest of the input into a shell command
pub const PIPE_MARKER: &str = "-- !";

/// Raw input separated into statements and an optional pipe command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitText {
    /// Statements in source order, trimmed, without terminating semicolons
    pub statements: Vec<String>,
    /// Shell command that receives the textual results
    pub pipe_command: Option<String>,
}

/// Splits multi-statement input text
pub struct StatementSplitter;

impl StatementSplitter {
    /// Split `text` into statements
    ///
    /// Everything after the first `-- !` is the pipe command and never part
    /// of a statement. Semicolons inside quotes or comments do not end a
    /// statement; statements holding nothing but comments are dropped.
    pub fn split(text: &str) -> SplitText {
        let (sql, pipe_command) = match text.find(PIPE_MARKER) {
            Some(pos) => (
                &text[..pos],
                Some(text[pos + PIPE_MARKER.len()..].trim())
                    .filter(|cmd| !cmd.is_empty())
                    .map(str::to_string),
            ),
            None => (text, None),
        };

        SplitText {
            statements: split_statements(sql),
            pipe_command,
        }
    }
}

fn split_statements(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_code = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                has_code = true;
                i = skip_quoted(bytes, i, quote);
                continue;
            }
            b'-' if is_dash_comment(bytes, i) => {
                i = skip_line(bytes, i);
                continue;
            }
            b'#' => {
                i = skip_line(bytes, i);
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i);
                continue;
            }
            b';' => {
                if has_code {
                    push_statement(&mut statements, &sql[start..i]);
                }
                start = i + 1;
                has_code = false;
            }
            b if !b.is_ascii_whitespace() => has_code = true,
            _ => {}
        }
        i += 1;
    }

    if has_code {
        push_statement(&mut statements, &sql[start..]);
    }
    statements
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
}

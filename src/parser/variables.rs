//! Query variables: `name := query` assignments and `$name` placeholders
//!
//! Expansion is two-phase. [`VariableEngine::expand`] stores assignments and
//! reports which referenced variables still hold only a query
//! ([`PendingCapture`]). The caller runs those queries and hands the first
//! column of the result to [`VariableEngine::resolve`]. Afterwards
//! [`VariableEngine::statements`] produces the concrete statements, one per
//! captured value of each referenced variable.

use std::collections::HashMap;

use tracing::debug;

use super::lexer::{
    is_dash_comment, is_identifier_char, skip_block_comment, skip_line, skip_quoted,
};

/// Stored state of a variable
#[derive(Debug, Clone, PartialEq, Eq)]
enum Variable {
    /// Assigned query, not run for capture yet
    Pending(String),
    /// Values captured from the assigned query
    Captured(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Text,
    Assign,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    kind: TokenKind,
    /// Source text; for placeholders the name without `$`
    text: String,
    /// Byte offset in the tokenized statement
    start: usize,
}

/// A variable whose query must run before expansion can finish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCapture {
    pub name: String,
    pub query: String,
}

/// Result of the first expansion phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    /// Statement after stripping any assignment prefix
    statement: String,
    tokens: Vec<Token>,
    /// Known variables referenced, first appearance order, distinct
    referenced: Vec<String>,
    pending: Vec<PendingCapture>,
}

impl Expansion {
    /// Captures the caller has to run and [`VariableEngine::resolve`]
    pub fn pending(&self) -> &[PendingCapture] {
        &self.pending
    }
}

/// Named variable store with placeholder expansion
#[derive(Debug, Clone, Default)]
pub struct VariableEngine {
    variables: HashMap<String, Variable>,
}

impl VariableEngine {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Phase one: record assignments and find referenced variables
    pub fn expand(&mut self, statement: &str) -> Expansion {
        let tokens = tokenize(statement);

        let (statement, tokens) = match assignment(&tokens) {
            Some(name) => {
                let rest = tokens
                    .get(2)
                    .map(|t| statement[t.start..].trim().to_string())
                    .unwrap_or_default();
                debug!(variable = %name, query = %rest, "Variable assigned");
                self.variables.insert(name, Variable::Pending(rest.clone()));
                let rest_tokens = tokenize(&rest);
                (rest, rest_tokens)
            }
            None => (statement.to_string(), tokens),
        };

        let mut referenced: Vec<String> = Vec::new();
        for token in &tokens {
            if token.kind == TokenKind::Placeholder
                && self.variables.contains_key(&token.text)
                && !referenced.contains(&token.text)
            {
                referenced.push(token.text.clone());
            }
        }

        let pending = referenced
            .iter()
            .filter_map(|name| match self.variables.get(name) {
                Some(Variable::Pending(query)) => Some(PendingCapture {
                    name: name.clone(),
                    query: query.clone(),
                }),
                _ => None,
            })
            .collect();

        Expansion {
            statement,
            tokens,
            referenced,
            pending,
        }
    }

    /// Store values captured for `name`
    pub fn resolve(&mut self, name: &str, values: Vec<String>) {
        debug!(variable = %name, values = values.len(), "Variable captured");
        self.variables
            .insert(name.to_string(), Variable::Captured(values));
    }

    /// Phase two: concrete statements to execute, in order
    ///
    /// Each referenced variable drives its own iteration; there is no
    /// cross product between variables. While one variable drives, other
    /// captured variables contribute their first value.
    pub fn statements(&self, expansion: &Expansion) -> Vec<String> {
        if expansion.referenced.is_empty() {
            return vec![expansion.statement.clone()];
        }

        let mut statements = Vec::new();
        for driver in &expansion.referenced {
            let Some(Variable::Captured(values)) = self.variables.get(driver) else {
                continue;
            };
            for value in values {
                statements.push(self.substitute(&expansion.tokens, driver, value));
            }
        }
        statements
    }

    fn substitute(&self, tokens: &[Token], driver: &str, value: &str) -> String {
        tokens
            .iter()
            .map(|token| match token.kind {
                TokenKind::Placeholder if token.text == driver => value.to_string(),
                TokenKind::Placeholder => match self.variables.get(&token.text) {
                    Some(Variable::Captured(values)) if !values.is_empty() => values[0].clone(),
                    _ => format!("${}", token.text),
                },
                TokenKind::Assign => ":=".to_string(),
                TokenKind::Text => token.text.clone(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Name of an `<identifier> := ...` assignment
fn assignment(tokens: &[Token]) -> Option<String> {
    match tokens {
        [name, assign, ..]
            if name.kind == TokenKind::Text
                && assign.kind == TokenKind::Assign
                && !name.text.is_empty()
                && name.text.bytes().all(is_identifier_char) =>
        {
            Some(name.text.clone())
        }
        _ => None,
    }
}

/// Split a statement into whitespace-separated tokens
///
/// Quoted runs stay inside their token, comments are dropped, `:=` is a token
/// of its own and `$name` starts a placeholder token.
fn tokenize(sql: &str) -> Vec<Token> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut current: Option<usize> = None;
    let mut i = 0;

    fn flush(sql: &str, tokens: &mut Vec<Token>, current: &mut Option<usize>, end: usize) {
        if let Some(start) = current.take() {
            tokens.push(Token {
                kind: TokenKind::Text,
                text: sql[start..end].to_string(),
                start,
            });
        }
    }

    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            flush(sql, &mut tokens, &mut current, i);
            i += 1;
        } else if (b == b'-' && is_dash_comment(bytes, i)) || b == b'#' {
            flush(sql, &mut tokens, &mut current, i);
            i = skip_line(bytes, i);
        } else if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
            flush(sql, &mut tokens, &mut current, i);
            i = skip_block_comment(bytes, i);
        } else if b == b':' && bytes.get(i + 1) == Some(&b'=') {
            flush(sql, &mut tokens, &mut current, i);
            tokens.push(Token {
                kind: TokenKind::Assign,
                text: ":=".to_string(),
                start: i,
            });
            i += 2;
        } else if b == b'$' && bytes.get(i + 1).is_some_and(|&c| is_identifier_char(c)) {
            flush(sql, &mut tokens, &mut current, i);
            let end = bytes[i + 1..]
                .iter()
                .position(|&c| !is_identifier_char(c))
                .map_or(bytes.len(), |pos| i + 1 + pos);
            tokens.push(Token {
                kind: TokenKind::Placeholder,
                text: sql[i + 1..end].to_string(),
                start: i,
            });
            i = end;
        } else if matches!(b, b'\'' | b'"' | b'`') {
            current.get_or_insert(i);
            i = skip_quoted(bytes, i, b);
        } else {
            current.get_or_insert(i);
            i += 1;
        }
    }
    flush(sql, &mut tokens, &mut current, bytes.len());
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_stores_and_runs_rest() {
        let mut engine = VariableEngine::new();
        let expansion = engine.expand("result := select * from foo.bar");

        assert!(expansion.pending().is_empty());
        assert_eq!(engine.statements(&expansion), vec!["select * from foo.bar"]);
        assert_eq!(
            engine.variables.get("result"),
            Some(&Variable::Pending("select * from foo.bar".to_string()))
        );
    }

    #[test]
    fn test_placeholder_expands_per_value() {
        let mut engine = VariableEngine::new();
        engine.resolve("result", vec!["bar".to_string(), "baz".to_string()]);

        let expansion = engine.expand("select * from foo.$result");
        assert!(expansion.pending().is_empty());
        assert_eq!(
            engine.statements(&expansion),
            vec!["select * from foo. bar", "select * from foo. baz"]
        );
    }

    #[test]
    fn test_pending_capture_then_resolve() {
        let mut engine = VariableEngine::new();
        engine.expand("result := select \"bla\"");

        let expansion = engine.expand("select * from foo.$result");
        assert_eq!(
            expansion.pending(),
            &[PendingCapture {
                name: "result".to_string(),
                query: "select \"bla\"".to_string(),
            }]
        );
        assert!(engine.statements(&expansion).is_empty());

        engine.resolve("result", vec!["bar".to_string(), "baz".to_string()]);
        assert_eq!(
            engine.statements(&expansion),
            vec!["select * from foo. bar", "select * from foo. baz"]
        );

        // Captured values are reused without another capture
        assert!(engine.expand("select $result").pending().is_empty());
    }

    #[test]
    fn test_plain_statement_is_verbatim() {
        let mut engine = VariableEngine::new();
        let sql = "select a,\n  b from t -- trailing";
        let expansion = engine.expand(sql);
        assert_eq!(engine.statements(&expansion), vec![sql]);
    }

    #[test]
    fn test_unknown_placeholder_is_literal() {
        let mut engine = VariableEngine::new();
        let sql = "select '$5.00', $unknown from prices";
        let expansion = engine.expand(sql);
        assert!(expansion.referenced.is_empty());
        assert_eq!(engine.statements(&expansion), vec![sql]);
    }

    #[test]
    fn test_placeholder_inside_quotes_is_not_expanded() {
        let mut engine = VariableEngine::new();
        engine.resolve("name", vec!["x".to_string()]);
        let expansion = engine.expand("select '$name'");
        assert!(expansion.referenced.is_empty());
    }

    #[test]
    fn test_each_variable_iterates_independently() {
        let mut engine = VariableEngine::new();
        engine.resolve("db", vec!["a".to_string(), "b".to_string()]);
        engine.resolve("t", vec!["users".to_string(), "orders".to_string()]);

        let expansion = engine.expand("select count(*) from $db.$t");
        assert_eq!(expansion.referenced, ["db".to_string(), "t".to_string()]);
        assert_eq!(
            engine.statements(&expansion),
            vec![
                "select count(*) from a . users",
                "select count(*) from b . users",
                "select count(*) from a . users",
                "select count(*) from a . orders",
            ]
        );
    }

    #[test]
    fn test_repeated_placeholder_counts_once() {
        let mut engine = VariableEngine::new();
        engine.resolve("id", vec!["1".to_string(), "2".to_string()]);

        let expansion = engine.expand("select $id, $id");
        assert_eq!(
            engine.statements(&expansion),
            vec!["select 1 , 1", "select 2 , 2"]
        );
    }

    #[test]
    fn test_empty_capture_yields_nothing() {
        let mut engine = VariableEngine::new();
        engine.resolve("ids", Vec::new());
        let expansion = engine.expand("delete from t where id = $ids");
        assert!(engine.statements(&expansion).is_empty());
    }

    #[test]
    fn test_reassignment_resets_capture() {
        let mut engine = VariableEngine::new();
        engine.resolve("v", vec!["1".to_string()]);
        engine.expand("v:=select 2");
        assert_eq!(engine.variables.get("v"), Some(&Variable::Pending("select 2".to_string())));
    }

    #[test]
    fn test_not_an_assignment() {
        let mut engine = VariableEngine::new();
        let expansion = engine.expand("set @x := 5");
                assert!(engine.variables.is_empty());
        assert_eq!(engine.statements(&expansion), vec!["set @x := 5"]);
    }

    #[test]
    fn test_tokenize_drops_comments_and_keeps_quotes() {
        let tokens: Vec<String> = tokenize("select 'a b' /* c */ from t -- d\nwhere x")
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert_eq!(tokens, vec!["select", "'a b'", "from", "t", "where", "x"]);
    }
}

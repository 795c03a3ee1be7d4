use std::collections::BTreeSet;

use crate::{Error, Result};

/// Schema names claimed by SQLite itself.
const RESERVED_SCHEMAS: &[&str] = &["main", "temp", "init"];

/// A SQL query plus the schema applied to unqualified table names.
#[derive(Debug, Clone)]
pub struct Query {
    pub sql: String,
    pub default_schema: String,
}

/// A `schema.table` reference discovered in a query. Ordering is
/// lexicographic by (schema, name), which fixes the build order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

impl Query {
    pub fn new(sql: impl Into<String>, default_schema: impl Into<String>) -> Query {
        Query {
            sql: sql.into(),
            default_schema: default_schema.into(),
        }
    }

    /// The set of tables this query references: every identifier that
    /// follows a `FROM` token or a token ending in `JOIN`. Some of these
    /// may be CTE names; callers ignore refs that resolve to no table and
    /// let SQLite flag true unknowns.
    pub fn table_refs(&self) -> Result<BTreeSet<TableRef>> {
        let tokens = tokenize(&self.sql);

        // A semicolon may only be followed by more semicolons.
        let mut seen_semicolon = false;
        for token in &tokens {
            match token {
                Token::Punct(';') => seen_semicolon = true,
                _ if seen_semicolon => return Err(Error::MultipleStatements),
                _ => (),
            }
        }

        let mut refs = BTreeSet::new();
        let mut index = 0;
        while index < tokens.len() {
            if is_from_or_join(&tokens[index]) {
                if let Some((table_ref, consumed)) = self.take_ref(&tokens[index + 1..])? {
                    refs.insert(table_ref);
                    index += consumed;
                }
            }
            index += 1;
        }
        Ok(refs)
    }

    /// Read a dotted name from the head of `tokens`, if one is there.
    fn take_ref(&self, tokens: &[Token]) -> Result<Option<(TableRef, usize)>> {
        let mut parts = Vec::new();
        let mut consumed = 0;
        while let Some(Token::Name(name)) = tokens.get(consumed) {
            parts.push(name.clone());
            if let Some(Token::Punct('.')) = tokens.get(consumed + 1) {
                consumed += 2;
            } else {
                consumed += 1;
                break;
            }
        }
        let (schema, name) = match parts.len() {
            0 => return Ok(None),
            1 => (self.default_schema.clone(), parts.pop().unwrap_or_default()),
            2 => {
                let name = parts.pop().unwrap_or_default();
                let schema = parts.pop().unwrap_or_default();
                let schema = if schema == "k8s" {
                    "kubernetes".to_string()
                } else {
                    schema
                };
                (schema, name)
            }
            _ => return Err(Error::BadTableRef(parts.join("."))),
        };
        if RESERVED_SCHEMAS.contains(&schema.as_str()) {
            return Err(Error::ReservedSchema(schema));
        }
        Ok(Some((TableRef { schema, name }, consumed)))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Punct(char),
    /// A quoted string or identifier; never treated as a table name.
    Literal,
}

fn is_from_or_join(token: &Token) -> bool {
    match token {
        Token::Name(name) => {
            let upper = name.to_ascii_uppercase();
            upper == "FROM" || upper.ends_with("JOIN")
        }
        _ => false,
    }
}

/// Flatten the SQL into tokens, skipping whitespace and comments. The
/// tokenizer is total: any input produces a token stream.
fn tokenize(sql: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = sql.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        match c {
            _ if c.is_whitespace() => (),
            '-' if matches!(chars.peek(), Some((_, '-'))) => {
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut last = ' ';
                for (_, c) in chars.by_ref() {
                    if last == '*' && c == '/' {
                        break;
                    }
                    last = c;
                }
            }
            '\'' | '"' | '`' => {
                // Quoted string or identifier; doubled quotes escape.
                while let Some((_, next)) = chars.next() {
                    if next == c {
                        if matches!(chars.peek(), Some((_, again)) if *again == c) {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
                tokens.push(Token::Literal);
            }
            _ if c.is_alphanumeric() || c == '_' => {
                let mut end = start + c.len_utf8();
                while let Some((index, next)) = chars.peek() {
                    if next.is_alphanumeric() || *next == '_' {
                        end = index + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Name(sql[start..end].to_string()));
            }
            _ => tokens.push(Token::Punct(c)),
        }
    }
    tokens
}

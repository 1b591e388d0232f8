//! Alias translation.
//!
//! Conditions, orderings and custom attribute sources are written against
//! attribute paths (`name`, `pets.name`, `pets.toys.color`). Before they
//! reach SQL every path is replaced by its qualified column
//! (`` `pets`.`name` ``) or by a parenthesized custom expression.

use std::collections::HashMap;

/// Attribute path to SQL source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMap {
    entries: HashMap<String, String>,
}

impl AliasMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, source: impl Into<String>) {
        self.entries.insert(path.into(), source.into());
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn extend(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces every whole attribute path in `sql` with its source.
    ///
    /// Text inside `'...'`, `"..."` and `` `...` `` is copied untouched.
    #[must_use]
    pub fn translate(&self, sql: &str) -> String {
        let mut out = String::with_capacity(sql.len());
        for token in Scanner::new(sql) {
            match token {
                Token::Path(path) => out.push_str(self.get(path).unwrap_or(path)),
                Token::Quoted(text) | Token::Other(text) => out.push_str(text),
            }
        }
        out
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    /// A maximal run of identifier characters and dots.
    Path(&'a str),
    /// A quoted span, quotes included.
    Quoted(&'a str),
    /// Anything else, one character at a time.
    Other(&'a str),
}

struct Scanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    const fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn scan_quoted(&mut self, quote: char) {
        self.advance();
        while let Some(c) = self.advance() {
            match c {
                '\\' if quote != '`' => {
                    self.advance();
                }
                c if c == quote => {
                    // doubled quote is an escaped quote
                    if self.peek() == Some(quote) {
                        self.advance();
                    } else {
                        return;
                    }
                }
                _ => {}
            }
        }
    }
}

const fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let start = self.pos;
        let c = self.peek()?;

        if matches!(c, '\'' | '"' | '`') {
            self.scan_quoted(c);
            return Some(Token::Quoted(&self.input[start..self.pos]));
        }

        if is_path_char(c) {
            while self.peek().is_some_and(is_path_char) {
                self.advance();
            }
            return Some(Token::Path(&self.input[start..self.pos]));
        }

        self.advance();
        Some(Token::Other(&self.input[start..self.pos]))
    }
}

//! Minimal reader for solver dictionary files.
//!
//! Only structure is recovered: nested `{}` sub-dictionaries and the byte
//! span of each `key value;` entry. Values are never interpreted here, so
//! replacing a span leaves every other byte of the file untouched.

use std::ops::Range;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DictError {
    #[error("unterminated comment starting at byte {offset}")]
    UnterminatedComment { offset: usize },

    #[error("unterminated string starting at byte {offset}")]
    UnterminatedString { offset: usize },

    #[error("unbalanced '{found}' at byte {offset}")]
    Unbalanced { found: char, offset: usize },

    #[error("entry '{key}' has no terminating ';'")]
    UnterminatedEntry { key: String },

    #[error("{open} sub-dictionaries left open at end of file")]
    UnclosedScope { open: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    Str,
    OpenBrace,
    CloseBrace,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Semicolon,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

/// A `key value;` entry with its full dictionary path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: Vec<String>,
    /// Byte span of the value text, excluding surrounding whitespace and
    /// the terminating `;`. Empty for `key ;`.
    pub value: Range<usize>,
}

impl Entry {
    pub fn dotted_path(&self) -> String {
        self.path.join(".")
    }
}

/// All entries of a dictionary file in source order.
pub fn entries(text: &str) -> Result<Vec<Entry>, DictError> {
    let tokens = tokenize(text)?;
    let mut found = Vec::new();
    let mut scope: Vec<String> = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let tok = tokens[i];
        match tok.kind {
            TokenKind::CloseBrace => {
                if scope.pop().is_none() {
                    return Err(DictError::Unbalanced {
                        found: '}',
                        offset: tok.start,
                    });
                }
                i += 1;
            }
            TokenKind::Semicolon => i += 1,
            TokenKind::OpenBrace => {
                scope.push(String::new());
                i += 1;
            }
            TokenKind::OpenParen | TokenKind::OpenBracket => {
                i = skip_balanced(&tokens, i, text)?;
            }
            TokenKind::CloseParen | TokenKind::CloseBracket => {
                return Err(DictError::Unbalanced {
                    found: text[tok.start..tok.end].chars().next().unwrap_or(')'),
                    offset: tok.start,
                });
            }
            TokenKind::Word | TokenKind::Str => {
                let key = key_text(text, tok);
                if key.starts_with('#') {
                    // Directives take a single argument and no ';'.
                    let has_arg = tokens
                        .get(i + 1)
                        .is_some_and(|t| matches!(t.kind, TokenKind::Word | TokenKind::Str));
                    i += if has_arg { 2 } else { 1 };
                    continue;
                }
                match tokens.get(i + 1).map(|t| t.kind) {
                    Some(TokenKind::OpenBrace) => {
                        scope.push(key.to_string());
                        i += 2;
                    }
                    _ => {
                        let (value, next) = scan_value(&tokens, i + 1, key)?;
                        let mut path = scope.clone();
                        path.push(key.to_string());
                        found.push(Entry { path, value });
                        i = next;
                    }
                }
            }
        }
    }

    if !scope.is_empty() {
        return Err(DictError::UnclosedScope { open: scope.len() });
    }
    Ok(found)
}

/// Value span of the entry at `path` (dot separated). When a key repeats,
/// the last definition wins, as in the solver's own reader.
pub fn find_entry(text: &str, path: &str) -> Result<Option<Range<usize>>, DictError> {
    let wanted: Vec<&str> = path.split('.').collect();
    Ok(entries(text)?
        .into_iter()
        .rev()
        .find(|e| e.path.iter().map(String::as_str).eq(wanted.iter().copied()))
        .map(|e| e.value))
}

/// Value text of the entry at `path`, if present.
pub fn entry_value<'a>(text: &'a str, path: &str) -> Result<Option<&'a str>, DictError> {
    Ok(find_entry(text, path)?.map(|r| &text[r]))
}

/// Replace the value of the entry at `path`. Returns `None` when the entry
/// does not exist.
pub fn replace_entry(
    text: &str,
    path: &str,
    new_value: &str,
) -> Result<Option<String>, DictError> {
    let Some(span) = find_entry(text, path)? else {
        return Ok(None);
    };
    let mut out = String::with_capacity(text.len() + new_value.len());
    out.push_str(&text[..span.start]);
    out.push_str(new_value);
    out.push_str(&text[span.end..]);
    Ok(Some(out))
}

fn key_text(text: &str, tok: Token) -> &str {
    let raw = &text[tok.start..tok.end];
    match tok.kind {
        TokenKind::Str => raw.trim_matches('"'),
        _ => raw,
    }
}

fn scan_value(
    tokens: &[Token],
    start: usize,
    key: &str,
) -> Result<(Range<usize>, usize), DictError> {
    let mut depth = 0usize;
    let mut j = start;
    loop {
        let Some(tok) = tokens.get(j) else {
            return Err(DictError::UnterminatedEntry {
                key: key.to_string(),
            });
        };
        match tok.kind {
            TokenKind::OpenParen | TokenKind::OpenBracket | TokenKind::OpenBrace => depth += 1,
            TokenKind::CloseParen | TokenKind::CloseBracket | TokenKind::CloseBrace => {
                if depth == 0 {
                    return Err(DictError::UnterminatedEntry {
                        key: key.to_string(),
                    });
                }
                depth -= 1;
            }
            TokenKind::Semicolon if depth == 0 => {
                let value = if j == start {
                    tok.start..tok.start
                } else {
                    tokens[start].start..tokens[j - 1].end
                };
                return Ok((value, j + 1));
            }
            _ => {}
        }
        j += 1;
    }
}

fn skip_balanced(tokens: &[Token], start: usize, text: &str) -> Result<usize, DictError> {
    let mut depth = 0usize;
    for (j, tok) in tokens.iter().enumerate().skip(start) {
        match tok.kind {
            TokenKind::OpenParen | TokenKind::OpenBracket => depth += 1,
            TokenKind::CloseParen | TokenKind::CloseBracket => {
                depth -= 1;
                if depth == 0 {
                    return Ok(j + 1);
                }
            }
            _ => {}
        }
    }
    Err(DictError::Unbalanced {
        found: text[tokens[start].start..].chars().next().unwrap_or('('),
        offset: tokens[start].start,
    })
}

fn tokenize(text: &str) -> Result<Vec<Token>, DictError> {
    let b = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < b.len() {
        let c = b[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c == b'/' && b.get(i + 1) == Some(&b'/') {
            while i < b.len() && b[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if c == b'/' && b.get(i + 1) == Some(&b'*') {
            match text[i + 2..].find("*/") {
                Some(pos) => i = i + 2 + pos + 2,
                None => return Err(DictError::UnterminatedComment { offset: i }),
            }
            continue;
        }

        let punct = match c {
            b'{' => Some(TokenKind::OpenBrace),
            b'}' => Some(TokenKind::CloseBrace),
            b'(' => Some(TokenKind::OpenParen),
            b')' => Some(TokenKind::CloseParen),
            b'[' => Some(TokenKind::OpenBracket),
            b']' => Some(TokenKind::CloseBracket),
            b';' => Some(TokenKind::Semicolon),
            _ => None,
        };
        if let Some(kind) = punct {
            out.push(Token {
                kind,
                start: i,
                end: i + 1,
            });
            i += 1;
            continue;
        }

        if c == b'"' {
            let start = i;
            i += 1;
            loop {
                match b.get(i) {
                    None => return Err(DictError::UnterminatedString { offset: start }),
                    Some(b'\\') => i += 2,
                    Some(b'"') => {
                        i += 1;
                        break;
                    }
                    Some(_) => i += 1,
                }
            }
            out.push(Token {
                kind: TokenKind::Str,
                start,
                end: i.min(b.len()),
            });
            continue;
        }

        // Identifier-like words may carry a balanced argument list, as in
        // `div(phi,U)`; numbers never do, so `3(1 2 3)` stays a list.
        let start = i;
        let identifier = c.is_ascii_alphabetic() || c == b'_';
        while i < b.len() {
            let c = b[i];
            if c.is_ascii_whitespace() || matches!(c, b'{' | b'}' | b';' | b')' | b'[' | b']' | b'"')
            {
                break;
            }
            if c == b'(' {
                match matching_paren(b, i) {
                    Some(close) if identifier => {
                        i = close + 1;
                        continue;
                    }
                    _ => break,
                }
            }
            i += 1;
        }
        out.push(Token {
            kind: TokenKind::Word,
            start,
            end: i,
        });
    }

    Ok(out)
}

fn matching_paren(b: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (j, &c) in b.iter().enumerate().skip(open) {
        match c {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(j);
                }
            }
            b';' | b'{' | b'}' | b'\n' | b' ' | b'\t' => return None,
            _ => {}
        }
    }
    None
}

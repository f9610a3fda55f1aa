//! SQL text normalization: literal obfuscation, table extraction and labels.
//!
//! Queries are scanned lexically rather than parsed. Quoted identifiers are
//! left alone, while string and numeric literals and bind placeholders all
//! collapse to `?`, so `WHERE id = 5` and `WHERE id = 7` normalize to the
//! same text.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static IN_LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\s*\?(?:\s*,\s*\?)+\s*\)").unwrap());

const ACTIONS: &[&str] = &["select", "insert", "update", "delete"];

/// Keywords that can trail a table reference and must not be read as aliases.
fn is_clause_keyword(word: &str) -> bool {
    matches!(
        word.to_ascii_lowercase().as_str(),
        "where"
            | "set"
            | "values"
            | "on"
            | "using"
            | "inner"
            | "left"
            | "right"
            | "outer"
            | "full"
            | "cross"
            | "join"
            | "group"
            | "order"
            | "limit"
            | "offset"
            | "returning"
            | "union"
            | "having"
            | "select"
            | "default"
    )
}

/// Quoting rules of the database that produced a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Generic,
    /// Double quotes delimit strings as well as single quotes.
    MySql,
    /// `$tag$ ... $tag$` delimits strings.
    Postgres,
}

impl Dialect {
    /// Dialect named by a query's `database_type`. Unknown and missing
    /// types use the generic rules.
    pub fn from_database_type(database_type: Option<&str>) -> Self {
        match database_type.map(str::to_ascii_lowercase).as_deref() {
            Some("mysql" | "mysql2" | "mariadb") => Self::MySql,
            Some("postgres" | "postgresql" | "postgis") => Self::Postgres,
            _ => Self::Generic,
        }
    }
}

/// Replace literal values in `sql` with `?` and fold whitespace, using the
/// quoting rules of `database_type`.
pub fn obfuscate(sql: &str, database_type: Option<&str>) -> String {
    let dialect = Dialect::from_database_type(database_type);
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        let after_identifier = continues_identifier(out.chars().last());
        if dialect == Dialect::Postgres && ch == '$' && !after_identifier {
            if let Some(end) = dollar_quote_end(&chars, i) {
                i = end;
                out.push('?');
                continue;
            }
        }
        match ch {
            '\'' => {
                i = skip_string(&chars, i, '\'');
                out.push('?');
            }
            '"' if dialect == Dialect::MySql => {
                i = skip_string(&chars, i, '"');
                out.push('?');
            }
            // Blob literal: X'1F'.
            'x' | 'X' if !after_identifier && chars.get(i + 1) == Some(&'\'') => {
                i = skip_string(&chars, i + 1, '\'');
                out.push('?');
            }
            '"' | '`' => {
                let close = ch;
                out.push(ch);
                i += 1;
                while i < chars.len() {
                    out.push(chars[i]);
                    if chars[i] == close {
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            '$' if i + 1 < chars.len() && chars[i + 1].is_ascii_digit() => {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                out.push('?');
            }
            c if c.is_ascii_digit() && !after_identifier => {
                i = skip_number(&chars, i);
                out.push('?');
            }
            c if c.is_whitespace() => {
                while i < chars.len() && chars[i].is_whitespace() {
                    i += 1;
                }
                if !out.is_empty() {
                    out.push(' ');
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    let trimmed = out.trim_end();
    IN_LIST_RE.replace_all(trimmed, "(?)").into_owned()
}

/// Index just past the string literal opened by `quote` at `start`. A
/// doubled quote or a backslash escapes the next character.
fn skip_string(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            break;
        }
        if chars[i] == '\\' {
            i += 1;
        }
        i += 1;
    }
    i + 1
}

/// Index just past a numeric literal: `0x1F`, `42`, `1.5`, `1e5`, `2.5E-3`.
fn skip_number(chars: &[char], start: usize) -> usize {
    let is_hex_prefix = chars[start] == '0'
        && matches!(chars.get(start + 1), Some('x' | 'X'))
        && chars.get(start + 2).is_some_and(char::is_ascii_hexdigit);
    if is_hex_prefix {
        let mut i = start + 2;
        while i < chars.len() && chars[i].is_ascii_hexdigit() {
            i += 1;
        }
        return i;
    }

    let mut i = start;
    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
        i += 1;
    }
    if matches!(chars.get(i), Some('e' | 'E')) {
        let digits = match chars.get(i + 1) {
            Some('+' | '-') => i + 2,
            _ => i + 1,
        };
        if chars.get(digits).is_some_and(char::is_ascii_digit) {
            i = digits;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    i
}

/// Index just past a dollar-quoted string (`$$...$$` or `$tag$...$tag$`)
/// opening at `start`, if it is one and it is closed.
fn dollar_quote_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if chars.get(j).is_some_and(char::is_ascii_digit) {
        return None;
    }
    while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
        j += 1;
    }
    if chars.get(j) != Some(&'$') {
        return None;
    }
    let tag = &chars[start..=j];
    let body = j + 1;
    let last = chars.len().checked_sub(tag.len())?;
    (body..=last)
        .find(|&k| chars[k..k + tag.len()] == *tag)
        .map(|k| k + tag.len())
}

fn continues_identifier(previous: Option<char>) -> bool {
    matches!(previous, Some(c) if c.is_alphanumeric() || c == '_' || c == '$')
}

/// Actions and tables referenced by a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryAnalysis {
    pub actions: Vec<String>,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Punct(char),
}

fn tokenize(sql: &str) -> Vec<Token> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if ch.is_whitespace() {
            i += 1;
        } else if ch == '\'' {
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                i += 1;
            }
            i += 1;
        } else if ch == '"' || ch == '`' || ch == '[' {
            let close = if ch == '[' { ']' } else { ch };
            let start = i + 1;
            i = start;
            while i < chars.len() && chars[i] != close {
                i += 1;
            }
            tokens.push(Token::Quoted(chars[start..i.min(chars.len())].iter().collect()));
            i += 1;
        } else if ch.is_alphanumeric() || ch == '_' || ch == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            tokens.push(Token::Word(chars[start..i].iter().collect()));
        } else {
            tokens.push(Token::Punct(ch));
            i += 1;
        }
    }
    tokens
}

/// Read a possibly schema-qualified name starting at `pos`; returns the last
/// segment and the position after it.
fn read_table_name(tokens: &[Token], mut pos: usize) -> Option<(String, usize)> {
    let mut name = match tokens.get(pos)? {
        Token::Word(w) if !is_clause_keyword(w) => w.clone(),
        Token::Quoted(q) => q.clone(),
        _ => return None,
    };
    pos += 1;
    while tokens.get(pos) == Some(&Token::Punct('.')) {
        match tokens.get(pos + 1) {
            Some(Token::Word(w)) => name = w.clone(),
            Some(Token::Quoted(q)) => name = q.clone(),
            _ => break,
        }
        pos += 2;
    }
    Some((name.to_lowercase(), pos))
}

/// Skip an optional `[AS] alias` following a table reference.
fn skip_alias(tokens: &[Token], mut pos: usize) -> usize {
    if let Some(Token::Word(w)) = tokens.get(pos) {
        if w.eq_ignore_ascii_case("as") {
            pos += 1;
        }
    }
    match tokens.get(pos) {
        Some(Token::Word(w)) if !is_clause_keyword(w) => pos + 1,
        Some(Token::Quoted(_)) => pos + 1,
        _ => pos,
    }
}

/// Extract the statement actions and table names (sorted, unique, lowercase).
///
/// Returns `None` when the text does not look like a DML statement.
pub fn analyze_query(sql: &str) -> Option<QueryAnalysis> {
    let tokens = tokenize(sql);
    let mut actions = BTreeSet::new();
    let mut tables = BTreeSet::new();

    let mut pos = 0;
    while pos < tokens.len() {
        let Token::Word(word) = &tokens[pos] else {
            pos += 1;
            continue;
        };
        let lowered = word.to_ascii_lowercase();
        if ACTIONS.contains(&lowered.as_str()) {
            actions.insert(lowered.clone());
        }
        pos += 1;
        if !matches!(lowered.as_str(), "from" | "join" | "into" | "update" | "table") {
            continue;
        }
        while let Some((table, next)) = read_table_name(&tokens, pos) {
            tables.insert(table);
            pos = skip_alias(&tokens, next);
            if lowered != "from" || tokens.get(pos) != Some(&Token::Punct(',')) {
                break;
            }
            pos += 1;
        }
    }

    if actions.is_empty() && tables.is_empty() {
        return None;
    }
    Some(QueryAnalysis {
        actions: actions.into_iter().collect(),
        tables: tables.into_iter().collect(),
    })
}

/// Short human label for a query, e.g. `SQL Select`.
pub fn sql_label(sql: &str) -> String {
    let first = sql
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    let action = match first.as_str() {
        "select" | "with" => "Select",
        "insert" => "Insert",
        "update" => "Update",
        "delete" => "Delete",
        "begin" | "commit" | "rollback" | "savepoint" | "release" => "Transaction",
        "create" | "alter" | "drop" | "truncate" => "Schema",
        _ => return "SQL".to_string(),
    };
    format!("SQL {action}")
}

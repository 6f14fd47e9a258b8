//! SQL text helpers: placeholder rewriting, script splitting and quoting.
//!
//! Statements are written with `:name` placeholders, the convention of the RDS
//! Data API. A direct PostgreSQL connection needs `$n` instead, so the instance
//! backend rewrites them. Literals, quoted identifiers, comments, dollar-quoted
//! bodies and `::` casts are left alone.

use cognition_core::models::row::SqlValue;

use crate::error::DbError;

const MAX_IDENTIFIER_LEN: usize = 63;

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// If a string literal, quoted identifier, comment or dollar-quoted body
/// starts at `i`, return the index just past its end.
fn skip_opaque(sql: &[u8], i: usize) -> Option<usize> {
    match sql[i] {
        quote @ (b'\'' | b'"') => {
            let mut j = i + 1;
            while j < sql.len() {
                if sql[j] == quote {
                    // Doubled quote is an escaped quote.
                    if sql.get(j + 1) == Some(&quote) {
                        j += 2;
                        continue;
                    }
                    return Some(j + 1);
                }
                j += 1;
            }
            Some(sql.len())
        }
        b'-' if sql.get(i + 1) == Some(&b'-') => Some(
            find(&sql[i..], b"\n")
                .map(|p| i + p + 1)
                .unwrap_or(sql.len()),
        ),
        b'/' if sql.get(i + 1) == Some(&b'*') => Some(
            find(&sql[i + 2..], b"*/")
                .map(|p| i + 2 + p + 2)
                .unwrap_or(sql.len()),
        ),
        b'$' => {
            if i > 0 && is_ident_byte(sql[i - 1]) {
                return None;
            }
            if sql.get(i + 1).is_some_and(u8::is_ascii_digit) {
                return None;
            }
            let mut j = i + 1;
            while j < sql.len() && is_ident_byte(sql[j]) {
                j += 1;
            }
            if sql.get(j) != Some(&b'$') {
                return None;
            }
            let tag = &sql[i..=j];
            let body = j + 1;
            Some(
                find(&sql[body..], tag)
                    .map(|p| body + p + tag.len())
                    .unwrap_or(sql.len()),
            )
        }
        _ => None,
    }
}

/// Rewrite `:name` placeholders to `$1..$n`.
///
/// Returns the rewritten SQL and the bound values in positional order. A name
/// used twice maps to the same position. Unbound names are an error.
pub fn to_positional(
    sql: &str,
    params: &[(String, SqlValue)],
) -> Result<(String, Vec<SqlValue>), DbError> {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut order: Vec<&str> = Vec::new();
    let mut values = Vec::new();
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if let Some(end) = skip_opaque(bytes, i) {
            i = end;
            continue;
        }
        if bytes[i] != b':' {
            i += 1;
            continue;
        }
        if bytes.get(i + 1) == Some(&b':') {
            i += 2;
            continue;
        }

        let start = i + 1;
        let starts_name = bytes
            .get(start)
            .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_');
        if !starts_name {
            i += 1;
            continue;
        }
        let mut end = start;
        while end < bytes.len() && is_ident_byte(bytes[end]) {
            end += 1;
        }

        let name = &sql[start..end];
        let position = match order.iter().position(|n| *n == name) {
            Some(p) => p + 1,
            None => {
                let value = params
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| DbError::query(format!("no value bound for :{name}")))?;
                order.push(name);
                values.push(value);
                order.len()
            }
        };

        out.push_str(&sql[copied..i]);
        out.push('$');
        out.push_str(&position.to_string());
        copied = end;
        i = end;
    }

    out.push_str(&sql[copied..]);
    Ok((out, values))
}

/// Split a script on top-level `;`, dropping empty and comment-only pieces.
pub fn split_statements(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if let Some(end) = skip_opaque(bytes, i) {
            i = end;
            continue;
        }
        if bytes[i] == b';' {
            push_statement(&mut statements, &sql[start..i]);
            start = i + 1;
        }
        i += 1;
    }
    push_statement(&mut statements, &sql[start..]);
    statements
}

fn push_statement(statements: &mut Vec<String>, chunk: &str) {
    let blank = chunk.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with("--")
    });
    if !blank {
        statements.push(chunk.trim().to_string());
    }
}

/// `name` -> `"name"`, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `it's` -> `'it''s'`.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Names used for tenants, schemas and roles: lowercase ASCII letters, digits
/// and underscores, not starting with a digit, at most 63 bytes.
pub fn validate_identifier(name: &str) -> Result<(), DbError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid_start && valid_rest && name.len() <= MAX_IDENTIFIER_LEN {
        Ok(())
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}

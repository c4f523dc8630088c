//! Natural-language queries over tabular documents.
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | word-level SQL lexer |
//! | [`security`] | signature gate for mutating statements |
//! | [`rewrite`] | access-level scoping of generated SQL |
//! | [`engine`] | question → SQL → rows → answer |
//! | [`postgres`] | sqlx-backed executor and table loader |

pub mod engine;
pub mod postgres;
pub mod rewrite;
pub mod scan;
pub mod security;

pub use engine::{
    ColumnInfo, SqlExecutor, TableMetadata, TabularQueryEngine, TabularStore, NO_DATA_MESSAGE,
};
pub use postgres::PgTabular;
pub use security::{extract_signature, SecurityVerdict, SqlSecurity};

/// Postgres identifiers are truncated past this many bytes.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Derive a table name from a document title: lowercase ASCII words joined
/// by underscores, prefixed when it would start with a digit.
pub fn sanitize_table_name(title: &str) -> String {
    let mut name = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else if !name.ends_with('_') {
            name.push('_');
        }
    }
    let mut name = name.trim_matches('_').to_string();
    if name.is_empty() {
        name = "table".to_string();
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "t_");
    }
    name.truncate(MAX_IDENTIFIER_LEN);
    name
}

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

//! Access-level scoping of generated SQL.
//!
//! Every statement that reaches the database carries
//! `access_level <= N`. The filter is ANDed onto the top-level `WHERE`
//! with the original condition parenthesized, so an `OR` in the model's
//! filter cannot widen the result.
//!
//! | Input | Output |
//! |-------|--------|
//! | `... WHERE c [tail]` | `... WHERE (c) AND access_level <= N [tail]` |
//! | `... [tail]` (no WHERE) | `... WHERE TRUE AND access_level <= N [tail]` |
//! | `a UNION b` | `SELECT * FROM (a UNION b) AS scoped WHERE TRUE AND access_level <= N` |
//! | `DROP ...` | unchanged |
//!
//! `tail` starts at the first top-level `GROUP`, `HAVING`, `WINDOW`,
//! `ORDER`, `LIMIT`, `OFFSET`, `FETCH`, `FOR` or `RETURNING`.
//!
//! Statements the lexer cannot place words in reliably are refused
//! outright: comments, unbalanced parentheses, unterminated literals,
//! dollar quotes and `E''` strings.

use crate::error::RagError;

use super::scan::{scan, Scan};

const TAIL_KEYWORDS: [&str; 9] = [
    "GROUP", "HAVING", "WINDOW", "ORDER", "LIMIT", "OFFSET", "FETCH", "FOR", "RETURNING",
];

const SET_OPERATORS: [&str; 3] = ["UNION", "INTERSECT", "EXCEPT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// `SELECT` / `WITH ... SELECT` / `VALUES`: returns rows.
    Read,
    /// `UPDATE` / `DELETE`: scoped, returns an affected-row count.
    Mutate,
    /// `DROP`: executed as is.
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedSql {
    pub sql: String,
    pub kind: StatementKind,
}

/// Strip trailing semicolons and whitespace.
pub fn trim_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

/// Classify a single statement by its first keyword.
pub fn classify(sql: &str) -> Result<StatementKind, RagError> {
    classify_scan(&scan(sql))
}

fn classify_scan(s: &Scan<'_>) -> Result<StatementKind, RagError> {
    let first = s
        .top_level()
        .next()
        .ok_or_else(|| RagError::UnsafeSql("empty statement".to_string()))?;

    if first.is("SELECT") || first.is("VALUES") || first.is("TABLE") {
        return Ok(StatementKind::Read);
    }
    if first.is("WITH") {
        // WITH ... UPDATE/DELETE: the main statement follows the CTEs.
        let main = s
            .top_level()
            .skip(1)
            .find(|w| w.is("SELECT") || w.is("UPDATE") || w.is("DELETE") || w.is("INSERT"));
        return match main {
            Some(w) if w.is("SELECT") => Ok(StatementKind::Read),
            Some(w) if w.is("UPDATE") || w.is("DELETE") => Ok(StatementKind::Mutate),
            _ => Err(RagError::UnsafeSql(format!(
                "unsupported statement: {}",
                first.text
            ))),
        };
    }
    if first.is("UPDATE") || first.is("DELETE") {
        return Ok(StatementKind::Mutate);
    }
    if first.is("DROP") {
        return Ok(StatementKind::Drop);
    }
    Err(RagError::UnsafeSql(format!(
        "unsupported statement: {}",
        first.text
    )))
}

/// Restrict `sql` to rows with `access_level <= level`.
///
/// Rejects input containing more than one statement, statement types
/// other than reads, `UPDATE`, `DELETE` and `DROP`, and any statement
/// whose [`Scan::rewrite_hazard`] is set.
pub fn scope_to_access_level(sql: &str, level: i64) -> Result<ScopedSql, RagError> {
    let sql = trim_statement(sql);
    let s = scan(sql);

    if let Some(hazard) = s.rewrite_hazard() {
        return Err(RagError::UnsafeSql(hazard.to_string()));
    }

    if !s.semicolons.is_empty() {
        return Err(RagError::UnsafeSql(
            "multiple statements are not allowed".to_string(),
        ));
    }

    let kind = classify_scan(&s)?;
    let filter = format!("access_level <= {}", level);

    if kind == StatementKind::Drop {
        return Ok(ScopedSql {
            sql: sql.to_string(),
            kind,
        });
    }

    if kind == StatementKind::Read
        && s.top_level().any(|w| SET_OPERATORS.iter().any(|k| w.is(k)))
    {
        return Ok(ScopedSql {
            sql: format!(
                "SELECT * FROM ({}) AS scoped WHERE TRUE AND {}",
                sql, filter
            ),
            kind,
        });
    }

    // The main statement's clauses come after any WITH list, whose bodies
    // sit inside parentheses.
    let where_word = s.top_level().find(|w| w.is("WHERE"));

    let scoped = match where_word {
        Some(w) => {
            let tail_start = s
                .top_level()
                .filter(|t| t.start > w.end)
                .find(|t| TAIL_KEYWORDS.iter().any(|k| t.is(k)))
                .map(|t| t.start)
                .unwrap_or(sql.len());
            let condition = sql[w.end..tail_start].trim();
            if condition.is_empty() {
                return Err(RagError::UnsafeSql("empty WHERE clause".to_string()));
            }
            join_parts(
                &format!("{}WHERE ({}) AND {}", &sql[..w.start], condition, filter),
                &sql[tail_start..],
            )
        }
        None => {
            let tail_start = s
                .top_level()
                .find(|t| TAIL_KEYWORDS.iter().any(|k| t.is(k)))
                .map(|t| t.start)
                .unwrap_or(sql.len());
            join_parts(
                &format!("{} WHERE TRUE AND {}", sql[..tail_start].trim_end(), filter),
                &sql[tail_start..],
            )
        }
    };

    Ok(ScopedSql { sql: scoped, kind })
}

fn join_parts(head: &str, tail: &str) -> String {
    let tail = tail.trim();
    if tail.is_empty() {
        head.to_string()
    } else {
        format!("{} {}", head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scoped(sql: &str) -> String {
        scope_to_access_level(sql, 3).unwrap().sql
    }

    #[test]
    fn where_clause_is_parenthesized() {
        assert_eq!(
            scoped("SELECT SUM(value) FROM loans WHERE week = '2024-09-23';"),
            "SELECT SUM(value) FROM loans WHERE (week = '2024-09-23') AND access_level <= 3"
        );
    }

    #[test]
    fn or_cannot_bypass_filter() {
        assert_eq!(
            scoped("SELECT * FROM t WHERE a = 1 OR 1 = 1"),
            "SELECT * FROM t WHERE (a = 1 OR 1 = 1) AND access_level <= 3"
        );
    }

    #[test]
    fn missing_where_is_inserted_before_tail() {
        assert_eq!(
            scoped("SELECT branch, COUNT(*) FROM t GROUP BY branch ORDER BY 2 DESC LIMIT 5"),
            "SELECT branch, COUNT(*) FROM t WHERE TRUE AND access_level <= 3 GROUP BY branch ORDER BY 2 DESC LIMIT 5"
        );
        assert_eq!(
            scoped("SELECT * FROM t"),
            "SELECT * FROM t WHERE TRUE AND access_level <= 3"
        );
    }

    #[test]
    fn where_with_tail_keeps_tail() {
        assert_eq!(
            scoped("SELECT * FROM t WHERE a > 1 ORDER BY a LIMIT 10"),
            "SELECT * FROM t WHERE (a > 1) AND access_level <= 3 ORDER BY a LIMIT 10"
        );
    }

    #[test]
    fn subquery_where_is_not_touched() {
        assert_eq!(
            scoped("SELECT * FROM (SELECT * FROM t WHERE a = 1) s"),
            "SELECT * FROM (SELECT * FROM t WHERE a = 1) s WHERE TRUE AND access_level <= 3"
        );
    }

    #[test]
    fn keywords_inside_literals_are_ignored() {
        assert_eq!(
            scoped("SELECT * FROM t WHERE note = 'ORDER BY where'"),
            "SELECT * FROM t WHERE (note = 'ORDER BY where') AND access_level <= 3"
        );
    }

    #[test]
    fn set_operations_are_wrapped() {
        assert_eq!(
            scoped("SELECT a, access_level FROM t UNION SELECT a, access_level FROM u"),
            "SELECT * FROM (SELECT a, access_level FROM t UNION SELECT a, access_level FROM u) AS scoped WHERE TRUE AND access_level <= 3"
        );
    }

    #[test]
    fn mutations_are_scoped() {
        let s = scope_to_access_level("UPDATE t SET v = 0 WHERE id = 4", 2).unwrap();
        assert_eq!(s.kind, StatementKind::Mutate);
        assert_eq!(s.sql, "UPDATE t SET v = 0 WHERE (id = 4) AND access_level <= 2");

        let s = scope_to_access_level("DELETE FROM t", 2).unwrap();
        assert_eq!(s.sql, "DELETE FROM t WHERE TRUE AND access_level <= 2");
    }

    #[test]
    fn drop_is_unfiltered() {
        let s = scope_to_access_level("DROP TABLE t;", 2).unwrap();
        assert_eq!(s.kind, StatementKind::Drop);
        assert_eq!(s.sql, "DROP TABLE t");
    }

    #[test]
    fn multiple_statements_are_rejected() {
        let err = scope_to_access_level("SELECT 1; DROP TABLE t", 2).unwrap_err();
        assert!(matches!(err, RagError::UnsafeSql(_)));
    }

    #[test]
    fn unsupported_statements_are_rejected() {
        assert!(scope_to_access_level("INSERT INTO t VALUES (1)", 2).is_err());
        assert!(scope_to_access_level("", 2).is_err());
    }

    fn rejected(sql: &str) -> String {
        match scope_to_access_level(sql, 1) {
            Err(RagError::UnsafeSql(reason)) => reason,
            other => panic!("expected UnsafeSql for {:?}, got {:?}", sql, other),
        }
    }

    #[test]
    fn stray_parenthesis_cannot_close_the_condition() {
        assert_eq!(
            rejected("SELECT * FROM t WHERE TRUE) OR (TRUE"),
            "unbalanced parentheses"
        );
        assert_eq!(
            rejected("UPDATE t SET v = 0 WHERE (id = 4"),
            "unbalanced parentheses"
        );
    }

    #[test]
    fn comments_cannot_swallow_the_filter() {
        assert_eq!(rejected("DELETE FROM t -- tidy up"), "comments are not allowed");
        assert_eq!(
            rejected("SELECT * FROM t WHERE a = 1 /* note */ ORDER BY a"),
            "comments are not allowed"
        );
    }

    #[test]
    fn unterminated_literals_are_rejected() {
        assert_eq!(
            rejected("SELECT * FROM t WHERE a = 'open"),
            "unterminated literal or comment"
        );
        assert_eq!(
            rejected("DELETE FROM t /* open"),
            "unterminated literal or comment"
        );
    }

    #[test]
    fn dollar_quotes_and_escape_strings_are_rejected() {
        assert_eq!(
            rejected("SELECT * FROM t WHERE a = $$x$$"),
            "dollar-quoted strings are not allowed"
        );
        assert_eq!(
            rejected("SELECT * FROM t WHERE a = $q$x$q$"),
            "dollar-quoted strings are not allowed"
        );
        assert_eq!(
            rejected("SELECT * FROM t WHERE a = E'x'"),
            "escape strings are not allowed"
        );
        // A backslash-escaped quote desynchronises the literal boundaries.
        assert!(scope_to_access_level("DELETE FROM t WHERE a = E'\\' OR TRUE --'", 1).is_err());
    }

    #[test]
    fn drop_with_hazard_is_rejected() {
        assert!(scope_to_access_level("DROP TABLE t -- and more", 1).is_err());
    }

    #[test]
    fn cte_is_classified_by_main_statement() {
        assert_eq!(
            classify("WITH x AS (SELECT 1) SELECT * FROM x").unwrap(),
            StatementKind::Read
        );
        assert_eq!(
            classify("WITH x AS (SELECT id FROM t) DELETE FROM t WHERE id IN (SELECT id FROM x)")
                .unwrap(),
            StatementKind::Mutate
        );
        assert_eq!(
            scoped("WITH x AS (SELECT * FROM t WHERE b) SELECT * FROM x WHERE c"),
            "WITH x AS (SELECT * FROM t WHERE b) SELECT * FROM x WHERE (c) AND access_level <= 3"
        );
    }
}

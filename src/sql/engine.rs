//! Question answering over a single tabular document.
//!
//! Lifecycle of [`TabularQueryEngine::run_query`]:
//!
//! 1. look up the table's columns (unknown table → `TableNotFound`)
//! 2. split an optional `-- SIGNATURE:` suffix off the question
//! 3. ask the completion model for one PostgreSQL statement
//! 4. pass it through the signature gate
//! 5. scope it to the caller's access level
//! 6. run it; an empty result short-circuits with a fixed message
//! 7. ask the model to phrase the rows as an answer

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::rewrite::{scope_to_access_level, trim_statement, StatementKind};
use super::security::{extract_signature, SqlSecurity};
use crate::completion::{strip_code_fence, ChatMessage, CompletionModel};
use crate::error::{check_access_level, RagError};
use crate::models::{Document, DocumentType, Table};

pub const NO_DATA_MESSAGE: &str =
    "I'm sorry, but there is no data available for your access level or the specified query.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// Runs SQL against the tabular database.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Columns of `table` in ordinal order; empty when the table does not exist.
    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;
    /// Run a read statement and return every row as display strings.
    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Vec<String>>>;
    /// Run a statement and return the number of affected rows.
    async fn execute(&self, sql: &str) -> Result<u64>;
}

/// Row of `metadata_table` describing one ingested tabular document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableMetadata {
    pub document_id: Uuid,
    pub title: String,
    pub doc_type: DocumentType,
    pub object_name: String,
    pub table_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub access_level: i64,
    pub summary: String,
}

impl TableMetadata {
    pub fn for_document(doc: &Document, table_name: &str, summary: &str) -> Self {
        Self {
            document_id: doc.id,
            title: doc.title.clone(),
            doc_type: doc.doc_type,
            object_name: doc.object_name.clone(),
            table_name: table_name.to_string(),
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            access_level: doc.access_level,
            summary: summary.to_string(),
        }
    }
}

/// Persists tabular documents.
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Drop and recreate `name` with the table's columns plus an
    /// `access_level` column set to `access_level` on every row.
    async fn replace_table(&self, name: &str, table: &Table, access_level: i64) -> Result<()>;
    /// Insert or update the metadata row keyed by document id.
    async fn upsert_metadata(&self, meta: &TableMetadata) -> Result<()>;
}

pub struct TabularQueryEngine {
    executor: Arc<dyn SqlExecutor>,
    model: Arc<dyn CompletionModel>,
    security: SqlSecurity,
    total_levels: u32,
}

impl TabularQueryEngine {
    pub fn new(
        executor: Arc<dyn SqlExecutor>,
        model: Arc<dyn CompletionModel>,
        security: SqlSecurity,
        total_levels: u32,
    ) -> Self {
        Self {
            executor,
            model,
            security,
            total_levels,
        }
    }

    /// Answer `question` from `table` using only rows with
    /// `access_level <= access_level`.
    pub async fn run_query(&self, question: &str, access_level: i64, table: &str) -> Result<String> {
        check_access_level(access_level, self.total_levels)?;

        let columns = self
            .executor
            .table_columns(table)
            .await
            .with_context(|| format!("Failed to read schema of {}", table))?;
        if columns.is_empty() {
            return Err(RagError::TableNotFound(table.to_string()).into());
        }

        let (base_question, signature) = extract_signature(question);

        let reply = self
            .model
            .complete(&[ChatMessage::user(sql_prompt(
                table,
                &columns,
                access_level,
                &base_question,
            ))])
            .await
            .context("Failed to generate SQL")?;
        let generated = trim_statement(strip_code_fence(&reply)).to_string();
        tracing::debug!(table, sql = %generated, "generated SQL");

        let verdict = self.security.check(&generated, signature.as_deref());
        if !verdict.is_valid {
            tracing::warn!(table, access_level, reason = %verdict.reason, "generated SQL rejected");
            return Err(RagError::SecurityCheckFailed(verdict.reason).into());
        }

        let scoped = scope_to_access_level(&generated, access_level)?;

        match scoped.kind {
            StatementKind::Read => {
                let rows = self
                    .executor
                    .fetch_rows(&scoped.sql)
                    .await
                    .with_context(|| format!("Query failed: {}", scoped.sql))?;
                if rows.is_empty() {
                    return Ok(NO_DATA_MESSAGE.to_string());
                }
                self.summarize(&base_question, &rows).await
            }
            StatementKind::Mutate | StatementKind::Drop => {
                let affected = self
                    .executor
                    .execute(&scoped.sql)
                    .await
                    .with_context(|| format!("Statement failed: {}", scoped.sql))?;
                tracing::info!(table, access_level, affected, "signed statement executed");
                Ok(format!(
                    "Query executed successfully; {} rows affected.",
                    affected
                ))
            }
        }
    }

    async fn summarize(&self, question: &str, rows: &[Vec<String>]) -> Result<String> {
        let data = rows
            .iter()
            .map(|r| r.join(", "))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Based on the question \"{}\", here is the data retrieved:\n\n{}\n\n\
             Please respond concisely and professionally, providing only the essential \
             information in a clear and direct manner.",
            question, data
        );
        self.model
            .complete(&[ChatMessage::user(prompt)])
            .await
            .context("Failed to summarize query results")
    }
}

fn sql_prompt(table: &str, columns: &[ColumnInfo], access_level: i64, question: &str) -> String {
    let cols = columns
        .iter()
        .map(|c| format!("{} ({})", c.name, c.data_type))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "You are querying the table \"{table}\" with the following columns:\n{cols}.\n\n\
         The table is in a PostgreSQL database. Column names containing spaces must be \
         enclosed in double quotes. Be wary of SQL injection attacks and make sure the query \
         is not malicious. Include a condition to filter rows based on the user's access \
         level: only retrieve rows where access_level <= {access_level}.\n\
         Respond with a single SQL statement and nothing else.\n\n\
         Question: {question}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }
        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionModel for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push(messages[0].content.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("no scripted reply left"))
        }
    }

    #[derive(Default)]
    struct Recording {
        rows: Vec<Vec<String>>,
        affected: u64,
        fetched: Mutex<Vec<String>>,
        executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SqlExecutor for Recording {
        async fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
            if table != "loans" {
                return Ok(Vec::new());
            }
            Ok(vec![
                ColumnInfo {
                    name: "week".into(),
                    data_type: "text".into(),
                },
                ColumnInfo {
                    name: "value".into(),
                    data_type: "bigint".into(),
                },
                ColumnInfo {
                    name: "access_level".into(),
                    data_type: "bigint".into(),
                },
            ])
        }
        async fn fetch_rows(&self, sql: &str) -> Result<Vec<Vec<String>>> {
            self.fetched.lock().unwrap().push(sql.to_string());
            Ok(self.rows.clone())
        }
        async fn execute(&self, sql: &str) -> Result<u64> {
            self.executed.lock().unwrap().push(sql.to_string());
            Ok(self.affected)
        }
    }

    fn engine(exec: Arc<Recording>, model: Arc<Scripted>) -> TabularQueryEngine {
        TabularQueryEngine::new(
            exec,
            model,
            SqlSecurity::new(Some("SAYNOTOSWIPER".to_string()), "salt"),
            5,
        )
    }

    #[tokio::test]
    async fn select_is_scoped_and_summarized() {
        let exec = Arc::new(Recording {
            rows: vec![vec!["2024-09-23".into(), "1500".into()]],
            ..Default::default()
        });
        let model = Scripted::new(&[
            "```sql\nSELECT week, SUM(value) FROM loans WHERE week = '2024-09-23' GROUP BY week;\n```",
            "The total approved value is 1500.",
        ]);
        let answer = engine(exec.clone(), model.clone())
            .run_query("What is the total value approved?", 3, "loans")
            .await
            .unwrap();

        assert_eq!(answer, "The total approved value is 1500.");
        let fetched = exec.fetched.lock().unwrap().clone();
        assert_eq!(
            fetched,
            vec!["SELECT week, SUM(value) FROM loans WHERE (week = '2024-09-23') AND access_level <= 3 GROUP BY week"]
        );

        let prompts = model.prompts();
        assert!(prompts[0].contains("access_level <= 3"));
        assert!(prompts[0].contains("Question: What is the total value approved?"));
        assert!(prompts[1].contains("2024-09-23, 1500"));
    }

    #[tokio::test]
    async fn empty_result_skips_the_model() {
        let exec = Arc::new(Recording::default());
        let model = Scripted::new(&["SELECT * FROM loans"]);
        let answer = engine(exec.clone(), model.clone())
            .run_query("Show everything", 2, "loans")
            .await
            .unwrap();
        assert_eq!(answer, NO_DATA_MESSAGE);
        assert_eq!(model.prompts().len(), 1);
        assert!(exec.fetched.lock().unwrap()[0].ends_with("AND access_level <= 2"));
    }

    #[tokio::test]
    async fn unsigned_update_never_executes() {
        let exec = Arc::new(Recording::default());
        let model = Scripted::new(&["UPDATE loans SET value = 0"]);
        let err = engine(exec.clone(), model)
            .run_query("Zero every value", 3, "loans")
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Security check failed: Modifying query requires signature"
        );
        assert!(exec.executed.lock().unwrap().is_empty());
        assert!(exec.fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn signed_delete_reports_affected_rows() {
        let exec = Arc::new(Recording {
            affected: 2,
            ..Default::default()
        });
        let model = Scripted::new(&["DELETE FROM loans WHERE week = '2024-09-23'"]);
        let answer = engine(exec.clone(), model.clone())
            .run_query("Remove that week -- SIGNATURE:SAYNOTOSWIPER", 4, "loans")
            .await
            .unwrap();

        assert_eq!(answer, "Query executed successfully; 2 rows affected.");
        assert_eq!(
            exec.executed.lock().unwrap().clone(),
            vec!["DELETE FROM loans WHERE (week = '2024-09-23') AND access_level <= 4"]
        );
        assert!(!model.prompts()[0].contains("SIGNATURE"));
    }

    #[tokio::test]
    async fn wrong_signature_is_rejected() {
        let exec = Arc::new(Recording::default());
        let model = Scripted::new(&["DROP TABLE loans"]);
        let err = engine(exec.clone(), model)
            .run_query("Drop it -- SIGNATURE:nope", 5, "loans")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::SecurityCheckFailed(r)) if r == "Invalid signature"
        ));
        assert!(exec.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_table_is_not_found() {
        let exec = Arc::new(Recording::default());
        let model = Scripted::new(&[]);
        let err = engine(exec, model.clone())
            .run_query("anything", 1, "nope")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::TableNotFound(t)) if t == "nope"
        ));
        assert!(model.prompts().is_empty());
    }

    #[tokio::test]
    async fn stacked_statements_are_rejected() {
        let exec = Arc::new(Recording::default());
        let model = Scripted::new(&["SELECT * FROM loans; SELECT 1"]);
        let err = engine(exec.clone(), model)
            .run_query("two things", 1, "loans")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::UnsafeSql(_))
        ));
        assert!(exec.fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn level_outside_range_is_rejected() {
        let exec = Arc::new(Recording::default());
        let model = Scripted::new(&[]);
        let err = engine(exec, model)
            .run_query("q", 6, "loans")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::InvalidAccessLevel { .. })
        ));
    }
}

//! Core data models used throughout the engine.
//!
//! These types represent the documents, chunks, vectors, and tables that
//! flow through the indexing and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::RagError;

/// Source document format. The type decides both the processor and whether
/// the document ends up in the tabular store or the vector tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Csv,
    Pdf,
    Txt,
    Xlsx,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Csv => "csv",
            DocumentType::Pdf => "pdf",
            DocumentType::Txt => "txt",
            DocumentType::Xlsx => "xlsx",
        }
    }

    /// CSV and XLSX go to SQL tables; PDF and TXT are chunked and embedded.
    pub fn is_tabular(&self) -> bool {
        matches!(self, DocumentType::Csv | DocumentType::Xlsx)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(DocumentType::Csv),
            "pdf" => Ok(DocumentType::Pdf),
            "txt" => Ok(DocumentType::Txt),
            "xlsx" => Ok(DocumentType::Xlsx),
            other => Err(RagError::UnsupportedDocumentType(other.to_string())),
        }
    }
}

/// A document record as supplied by the document catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub title: String,
    pub object_name: String,
    pub access_level: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Worksheet to load for XLSX documents; the first sheet when absent.
    #[serde(default)]
    pub sheet_name: Option<String>,
}

impl Document {
    pub fn validate(&self) -> Result<(), RagError> {
        if self.title.trim().is_empty() {
            return Err(RagError::InvalidDocument(
                "Document title is required".to_string(),
            ));
        }
        if self.object_name.is_empty() {
            return Err(RagError::InvalidDocument(
                "Object name is required".to_string(),
            ));
        }
        if self.object_name.chars().any(char::is_whitespace) {
            return Err(RagError::InvalidDocument(format!(
                "Object name must not contain whitespace: '{}'",
                self.object_name
            )));
        }
        if self.access_level < 1 {
            return Err(RagError::InvalidDocument(format!(
                "Access level must be >= 1, got {}",
                self.access_level
            )));
        }
        Ok(())
    }
}

/// Metadata attached to every node cut from a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeMetadata {
    pub document_id: Option<Uuid>,
    pub title: Option<String>,
    pub doc_type: Option<DocumentType>,
    pub object_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub access_level: Option<i64>,
}

impl NodeMetadata {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            document_id: Some(doc.id),
            title: Some(doc.title.clone()),
            doc_type: Some(doc.doc_type),
            object_name: Some(doc.object_name.clone()),
            created_at: Some(doc.created_at),
            updated_at: Some(doc.updated_at),
            access_level: Some(doc.access_level),
        }
    }
}

/// An ephemeral chunk of document text. Embedded and stored, then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub text: String,
    pub metadata: NodeMetadata,
}

impl Node {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: NodeMetadata::default(),
        }
    }
}

/// A vector ready to be written to the tier tables.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub item_id: String,
    pub values: Vec<f32>,
    pub text_content: String,
}

/// One hit from a tier query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMatch {
    pub item_id: String,
    pub text_content: String,
    /// Euclidean distance to the query vector; smaller is closer.
    pub distance: f64,
}

/// Name and caption the completion model gives a tabular document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub table_name: String,
    pub table_summary: String,
}

/// A loaded spreadsheet or CSV: header row plus string cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// SQL column type inferred from a column's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Text,
}

impl ColumnKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::Integer => "BIGINT",
            ColumnKind::Float => "DOUBLE PRECISION",
            ColumnKind::Text => "TEXT",
        }
    }
}

impl Table {
    /// Render the header and the first `n` rows as CSV text.
    pub fn head_csv(&self, n: usize) -> anyhow::Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in self.rows.iter().take(n) {
            writer.write_record(row)?;
        }
        let bytes = writer.into_inner().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Infer a SQL type per column. Empty cells are ignored; a column with
    /// no values at all is TEXT.
    pub fn column_kinds(&self) -> Vec<ColumnKind> {
        (0..self.columns.len())
            .map(|i| {
                let values: Vec<&str> = self
                    .rows
                    .iter()
                    .filter_map(|r| r.get(i))
                    .map(|v| v.trim())
                    .filter(|v| !v.is_empty())
                    .collect();
                if values.is_empty() {
                    ColumnKind::Text
                } else if values.iter().all(|v| v.parse::<i64>().is_ok()) {
                    ColumnKind::Integer
                } else if values.iter().all(|v| v.parse::<f64>().is_ok()) {
                    ColumnKind::Float
                } else {
                    ColumnKind::Text
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document {
            id: Uuid::new_v4(),
            doc_type: DocumentType::Txt,
            title: "FAQ".to_string(),
            object_name: "docs/faq.txt".to_string(),
            access_level: 2,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            sheet_name: None,
        }
    }

    #[test]
    fn document_type_parse() {
        assert_eq!("PDF".parse::<DocumentType>().unwrap(), DocumentType::Pdf);
        assert_eq!("xlsx".parse::<DocumentType>().unwrap(), DocumentType::Xlsx);
        let err = "docx".parse::<DocumentType>().unwrap_err();
        assert!(matches!(err, RagError::UnsupportedDocumentType(t) if t == "docx"));
    }

    #[test]
    fn tabular_types() {
        assert!(DocumentType::Csv.is_tabular());
        assert!(DocumentType::Xlsx.is_tabular());
        assert!(!DocumentType::Pdf.is_tabular());
        assert!(!DocumentType::Txt.is_tabular());
    }

    #[test]
    fn validate_rejects_bad_documents() {
        assert!(doc().validate().is_ok());

        let mut d = doc();
        d.title = "  ".to_string();
        assert!(d.validate().is_err());

        let mut d = doc();
        d.object_name = String::new();
        assert!(d.validate().is_err());

        let mut d = doc();
        d.object_name = "my file.txt".to_string();
        assert!(d.validate().is_err());

        let mut d = doc();
        d.access_level = 0;
        assert!(d.validate().is_err());
    }

    #[test]
    fn document_deserializes_type_field() {
        let json = r#"{
            "id": "7d3c1b0e-9a51-4f0b-8a43-2f4f3c9a1e11",
            "type": "csv",
            "title": "Loans",
            "object_name": "loans.csv",
            "access_level": 3,
            "created_at": "2024-09-23T10:00:00Z",
            "updated_at": "2024-09-23T10:00:00Z"
        }"#;
        let d: Document = serde_json::from_str(json).unwrap();
        assert_eq!(d.doc_type, DocumentType::Csv);
        assert!(d.sheet_name.is_none());
    }

    #[test]
    fn column_kind_inference() {
        let table = Table {
            columns: vec!["week".into(), "count".into(), "value".into(), "note".into()],
            rows: vec![
                vec!["2024-09-23".into(), "3".into(), "1.5".into(), "".into()],
                vec!["2024-09-30".into(), "".into(), "2".into(), "".into()],
            ],
        };
        assert_eq!(
            table.column_kinds(),
            vec![
                ColumnKind::Text,
                ColumnKind::Integer,
                ColumnKind::Float,
                ColumnKind::Text
            ]
        );
    }

    #[test]
    fn head_csv_limits_rows() {
        let table = Table {
            columns: vec!["a".into(), "b".into()],
            rows: (0..20).map(|i| vec![i.to_string(), "x".into()]).collect(),
        };
        let csv = table.head_csv(10).unwrap();
        assert_eq!(csv.lines().count(), 11);
        assert!(csv.starts_with("a,b\n"));
    }
}

//! Per-format document processors.
//!
//! Tabular formats (CSV, XLSX) become a [`Table`] plus a model-written
//! [`TableInfo`]; text formats (PDF, TXT) become [`Node`]s cut by the
//! sentence chunker. Dispatch is an exhaustive match on [`DocumentType`].

use anyhow::{Context, Result};

use crate::chunk::split_text;
use crate::completion::{strip_code_fence, ChatMessage, CompletionModel};
use crate::config::ChunkingConfig;
use crate::error::RagError;
use crate::extract;
use crate::models::{DocumentType, Node, NodeMetadata, Table, TableInfo};

const TABLE_SUMMARY_PROMPT: &str = "\
Summarize the table below as JSON with exactly two keys: \"table_name\" and \"table_summary\".

- table_name must be unique to the table and describe it while being concise.
- table_name must use underscores and NO spaces.
- Do NOT output a generic table name (e.g. table, my_table).
- table_summary is a short, concise summary/caption of the table.

Table:
{table_str}

Summary: ";

/// What a processor produced for one document.
#[derive(Debug)]
pub enum Processed {
    Tabular { table: Table, info: TableInfo },
    Nodes(Vec<Node>),
}

/// Inputs shared by every processor call.
pub struct ProcessorContext<'a> {
    pub chunking: &'a ChunkingConfig,
    pub preview_rows: usize,
    pub model: &'a dyn CompletionModel,
}

/// Process downloaded bytes according to `doc_type`.
///
/// `location` names the document in errors. `sheet` picks the XLSX
/// worksheet and is ignored for other formats. Node metadata is left empty;
/// callers that know the source document fill it in.
pub async fn process(
    doc_type: DocumentType,
    bytes: &[u8],
    location: &str,
    sheet: Option<&str>,
    ctx: &ProcessorContext<'_>,
) -> Result<Processed> {
    match doc_type {
        DocumentType::Csv => {
            let table = extract::load_csv(bytes, location)?;
            let info = summarize_table(&table, ctx).await?;
            Ok(Processed::Tabular { table, info })
        }
        DocumentType::Xlsx => {
            let table = extract::load_xlsx(bytes, location, sheet)?;
            let info = summarize_table(&table, ctx).await?;
            Ok(Processed::Tabular { table, info })
        }
        DocumentType::Pdf => {
            let text = extract::extract_pdf(bytes, location)?;
            Ok(Processed::Nodes(text_to_nodes(&text, ctx.chunking)))
        }
        DocumentType::Txt => {
            let text = extract::decode_txt(bytes);
            Ok(Processed::Nodes(text_to_nodes(&text, ctx.chunking)))
        }
    }
}

/// Chunk text into nodes with empty metadata.
pub fn text_to_nodes(text: &str, chunking: &ChunkingConfig) -> Vec<Node> {
    split_text(text, chunking)
        .into_iter()
        .map(|t| Node {
            text: t,
            metadata: NodeMetadata::default(),
        })
        .collect()
}

/// Ask the completion model for a table name and caption.
pub async fn summarize_table(table: &Table, ctx: &ProcessorContext<'_>) -> Result<TableInfo> {
    let preview = table.head_csv(ctx.preview_rows)?;
    let prompt = TABLE_SUMMARY_PROMPT.replace("{table_str}", &preview);
    let reply = ctx
        .model
        .complete(&[ChatMessage::user(prompt)])
        .await
        .context("Failed to generate table summary")?;
    parse_table_info(&reply)
}

/// Parse the model's JSON reply, tolerating code fences and prose around
/// the object.
pub fn parse_table_info(reply: &str) -> Result<TableInfo> {
    let body = strip_code_fence(reply);
    let json = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if end > start => &body[start..=end],
        _ => anyhow::bail!("Table summary reply contains no JSON object: {}", reply),
    };
    let mut info: TableInfo = serde_json::from_str(json)
        .with_context(|| format!("Table summary reply is not valid TableInfo JSON: {}", json))?;
    info.table_name = info
        .table_name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    if info.table_name.is_empty() {
        return Err(RagError::InvalidDocument("model returned an empty table name".to_string()).into());
    }
    Ok(info)
}

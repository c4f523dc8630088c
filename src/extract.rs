//! Format readers for downloaded document bytes.
//!
//! | Format | Reader | Output |
//! |--------|--------|--------|
//! | CSV | `csv` crate, first record is the header | [`Table`] |
//! | XLSX | ZIP + `quick-xml` over the OOXML parts | [`Table`] |
//! | PDF | `pdf-extract` | plain text |
//! | TXT | lossy UTF-8 decode | plain text |
//!
//! Every failure is reported as [`RagError::DocumentLoad`] naming the
//! document location; nothing here panics on malformed input.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;

use quick_xml::events::{BytesStart, Event};

use crate::error::RagError;
use crate::models::Table;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum cells to read per sheet. Larger sheets are rejected, not truncated.
const XLSX_MAX_CELLS_PER_SHEET: usize = 1_000_000;
/// Zero-based index of column XFD, the last column Excel allows.
const XLSX_MAX_COLUMN: usize = 16_383;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

/// Parse CSV bytes. The first record is the header; short records are
/// padded with empty cells and long ones truncated to the header width.
pub fn load_csv(bytes: &[u8], location: &str) -> Result<Table, RagError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| RagError::load(location, e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if columns.is_empty() || columns.iter().all(|c| c.is_empty()) {
        return Err(RagError::load(location, "CSV has no header row"));
    }
    let columns = normalize_columns(columns);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| RagError::load(location, e))?;
        let mut row: Vec<String> = record.iter().map(|v| v.to_string()).collect();
        if row.iter().all(|v| v.trim().is_empty()) {
            continue;
        }
        row.resize(columns.len(), String::new());
        rows.push(row);
    }

    Ok(Table { columns, rows })
}

/// Parse one worksheet of an XLSX workbook. `sheet` selects by name; the
/// first sheet in workbook order is used when `None`.
pub fn load_xlsx(bytes: &[u8], location: &str, sheet: Option<&str>) -> Result<Table, RagError> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| RagError::load(location, e))?;

    let sheets = list_sheets(&mut archive, location)?;
    let (sheet_name, part) = match sheet {
        Some(name) => sheets
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| {
                RagError::load(
                    location,
                    format!("Sheet '{}' not found in the file: {}", name, location),
                )
            })?,
        None => sheets
            .first()
            .ok_or_else(|| RagError::load(location, "workbook contains no sheets"))?,
    };
    let (sheet_name, part) = (sheet_name.clone(), part.clone());

    let has_shared = archive
        .file_names()
        .any(|n| n == "xl/sharedStrings.xml");
    let shared_strings = if has_shared {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml", location)?;
        read_shared_strings(&xml, location)?
    } else {
        Vec::new()
    };

    let sheet_xml = read_zip_entry_bounded(&mut archive, &part, location)?;
    let grid = read_sheet_rows(
        &sheet_xml,
        &shared_strings,
        location,
        &sheet_name,
        XLSX_MAX_CELLS_PER_SHEET,
    )?;
    Ok(grid_to_table(grid))
}

/// Extract the text layer of a PDF.
pub fn extract_pdf(bytes: &[u8], location: &str) -> Result<String, RagError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| RagError::load(location, e))
}

/// Decode a text file, replacing invalid UTF-8 sequences.
pub fn decode_txt(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Name blank headers `Unnamed: {i}` and suffix repeats with `.1`, `.2`, ...
fn normalize_columns(columns: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    columns
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            let base = if c.is_empty() {
                format!("Unnamed: {}", i)
            } else {
                c
            };
            let count = seen.entry(base.to_lowercase()).or_insert(0);
            let name = if *count == 0 {
                base.clone()
            } else {
                format!("{}.{}", base, count)
            };
            *count += 1;
            name
        })
        .collect()
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    location: &str,
) -> Result<Vec<u8>, RagError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| RagError::load(location, format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| RagError::load(location, e))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(RagError::load(
            location,
            format!("ZIP entry {} exceeds size limit ({} bytes)", name, MAX_XML_ENTRY_BYTES),
        ));
    }
    Ok(out)
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Sheet names in workbook order, paired with their worksheet part paths.
fn list_sheets(archive: &mut Archive<'_>, location: &str) -> Result<Vec<(String, String)>, RagError> {
    let workbook = read_zip_entry_bounded(archive, "xl/workbook.xml", location)?;
    let rels = read_zip_entry_bounded(archive, "xl/_rels/workbook.xml.rels", location)?;

    let mut targets: HashMap<String, String> = HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(rels.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Relationship" {
                    if let (Some(id), Some(target)) =
                        (attr_value(&e, b"Id"), attr_value(&e, b"Target"))
                    {
                        targets.insert(id, target);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(RagError::load(location, e)),
            _ => {}
        }
        buf.clear();
    }

    let mut sheets = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(workbook.as_slice());
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    let name = attr_value(&e, b"name").unwrap_or_default();
                    // r:id, matched on local name
                    let rel = attr_value(&e, b"id");
                    if let Some(target) = rel.and_then(|r| targets.get(&r)) {
                        sheets.push((name, resolve_part(target)));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(RagError::load(location, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

/// Relationship targets are relative to `xl/` unless absolute.
fn resolve_part(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(abs) => abs.to_string(),
        None => format!("xl/{}", target),
    }
}

fn read_shared_strings(xml: &[u8], location: &str) -> Result<Vec<String>, RagError> {
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"si" {
                    strings.push(String::new());
                }
            }
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(|e| RagError::load(location, e))?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.push(current.take().unwrap_or_default()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(RagError::load(location, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Zero-based column index from a cell reference like `AB12`; `None` when
/// the reference has no column letters. Columns past XFD are an error.
fn column_index(cell_ref: &str, location: &str) -> Result<Option<usize>, RagError> {
    let out_of_range = || {
        RagError::load(
            location,
            format!("Cell reference '{}' is beyond column XFD", cell_ref),
        )
    };

    let mut n = 0usize;
    let mut letters = 0usize;
    for b in cell_ref.bytes().take_while(|b| b.is_ascii_alphabetic()) {
        let digit = (b.to_ascii_uppercase() - b'A' + 1) as usize;
        n = n
            .checked_mul(26)
            .and_then(|v| v.checked_add(digit))
            .filter(|&v| v <= XLSX_MAX_COLUMN + 1)
            .ok_or_else(out_of_range)?;
        letters += 1;
    }
    if letters == 0 {
        return Ok(None);
    }
    Ok(Some(n - 1))
}

#[derive(Default)]
struct CellState {
    col: usize,
    kind: String,
    value: String,
}

fn read_sheet_rows(
    xml: &[u8],
    shared_strings: &[String],
    location: &str,
    sheet_name: &str,
    max_cells: usize,
) -> Result<Vec<BTreeMap<usize, String>>, RagError> {
    let mut rows = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut row: Option<BTreeMap<usize, String>> = None;
    let mut cell: Option<CellState> = None;
    let mut in_value = false;
    let mut cell_count = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row = Some(BTreeMap::new()),
                b"c" => {
                    let next_col = row
                        .as_ref()
                        .and_then(|r| r.keys().next_back().map(|k| k + 1))
                        .unwrap_or(0);
                    let col = match attr_value(&e, b"r") {
                        Some(r) => column_index(&r, location)?.unwrap_or(next_col),
                        None => next_col,
                    };
                    if col > XLSX_MAX_COLUMN {
                        return Err(RagError::load(
                            location,
                            format!("Sheet '{}' has a cell beyond column XFD", sheet_name),
                        ));
                    }
                    cell = Some(CellState {
                        col,
                        kind: attr_value(&e, b"t").unwrap_or_default(),
                        value: String::new(),
                    });
                }
                b"v" | b"t" => in_value = cell.is_some(),
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                if let Some(c) = cell.as_mut() {
                    c.value
                        .push_str(&te.unescape().map_err(|e| RagError::load(location, e))?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let (Some(c), Some(r)) = (cell.take(), row.as_mut()) {
                        let value = cell_value(&c, shared_strings);
                        if !value.is_empty() {
                            if cell_count >= max_cells {
                                return Err(RagError::load(
                                    location,
                                    format!(
                                        "Sheet '{}' has more than {} cells",
                                        sheet_name, max_cells
                                    ),
                                ));
                            }
                            r.insert(c.col, value);
                            cell_count += 1;
                        }
                    }
                }
                b"row" => {
                    if let Some(r) = row.take() {
                        rows.push(r);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(RagError::load(location, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

fn cell_value(cell: &CellState, shared_strings: &[String]) -> String {
    match cell.kind.as_str() {
        "s" => cell
            .value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared_strings.get(i).cloned())
            .unwrap_or_default(),
        "b" => match cell.value.trim() {
            "1" => "TRUE".to_string(),
            "0" => "FALSE".to_string(),
            other => other.to_string(),
        },
        "inlineStr" | "str" => cell.value.clone(),
        _ => cell.value.trim().to_string(),
    }
}

fn grid_to_table(grid: Vec<BTreeMap<usize, String>>) -> Table {
    let mut rows = grid.into_iter().filter(|r| !r.is_empty());
    let header = match rows.next() {
        Some(h) => h,
        None => return Table::default(),
    };
    let data: Vec<BTreeMap<usize, String>> = rows.collect();

    let width = std::iter::once(&header)
        .chain(data.iter())
        .filter_map(|r| r.keys().next_back())
        .max()
        .map(|k| k + 1)
        .unwrap_or(0);

    let columns = normalize_columns(
        (0..width)
            .map(|i| header.get(&i).map(|v| v.trim().to_string()).unwrap_or_default())
            .collect(),
    );
    let rows = data
        .into_iter()
        .map(|r| {
            (0..width)
                .map(|i| r.get(&i).cloned().unwrap_or_default())
                .collect()
        })
        .collect();

    Table { columns, rows }
}

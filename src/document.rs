//! Uploaded files: type detection, text extraction and previews.
//!
//! A [`Document`] is built once per upload and never changes afterwards. Its
//! [`Document::text`] is what gets embedded in prompts: the literal content
//! for TXT files, a lossless aligned table for CSV files.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::constants::{CSV_PREVIEW_ROWS, TEXT_PREVIEW_CHARS};

const COLUMN_GAP: &str = "  ";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("unsupported file type for '{name}': only .txt and .csv files are accepted")]
    UnsupportedType { name: String },
    #[error("'{name}' is empty")]
    Empty { name: String },
    #[error("'{name}' is not valid UTF-8 text: {source}")]
    Encoding {
        name: String,
        source: std::str::Utf8Error,
    },
    #[error("could not parse '{name}' as CSV: {source}")]
    Csv { name: String, source: csv::Error },
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Txt,
    Csv,
}

impl FileKind {
    /// Decides the kind from the file extension, falling back to the declared
    /// content type only when the name carries no extension at all.
    pub fn detect(file_name: &str, content_type: Option<&str>) -> Result<Self, DocumentError> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        let unsupported = || DocumentError::UnsupportedType {
            name: file_name.to_string(),
        };

        match extension.as_deref() {
            Some("txt") => Ok(FileKind::Txt),
            Some("csv") => Ok(FileKind::Csv),
            Some(_) => Err(unsupported()),
            None => {
                let mime = content_type
                    .and_then(|ct| ct.split(';').next())
                    .map(|ct| ct.trim().to_ascii_lowercase());
                match mime.as_deref() {
                    Some("text/plain") => Ok(FileKind::Txt),
                    Some("text/csv") | Some("application/csv") => Ok(FileKind::Csv),
                    _ => Err(unsupported()),
                }
            }
        }
    }
}

/// Parsed CSV content, kept for the tabular preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    fn parse(name: &str, text: &str) -> Result<Self, DocumentError> {
        let csv_error = |source| DocumentError::Csv {
            name: name.to_string(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(csv_error)?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self { headers, rows })
    }

    fn column_count(&self) -> usize {
        self.rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.headers.len()))
            .max()
            .unwrap_or(0)
    }

    /// Renders every cell right-aligned per column, one line per record.
    /// Line breaks and tabs inside a cell are written as `\n`, `\r` and `\t`.
    /// Cells missing from short rows render as blanks.
    pub fn render(&self) -> String {
        let lines: Vec<Vec<String>> = std::iter::once(&self.headers)
            .chain(self.rows.iter())
            .map(|line| line.iter().map(|cell| escape_cell(cell)).collect())
            .collect();

        let mut widths = vec![0usize; self.column_count()];
        for line in &lines {
            for (col, cell) in line.iter().enumerate() {
                widths[col] = widths[col].max(cell.chars().count());
            }
        }

        lines
            .iter()
            .map(|line| {
                widths
                    .iter()
                    .enumerate()
                    .map(|(col, width)| {
                        let cell = line.get(col).map(String::as_str).unwrap_or("");
                        format!("{:>width$}", cell, width = *width)
                    })
                    .collect::<Vec<_>>()
                    .join(COLUMN_GAP)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn escape_cell(cell: &str) -> String {
    let mut escaped = String::with_capacity(cell.len());
    for c in cell.chars() {
        match c {
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Preview {
    Text {
        excerpt: String,
        truncated: bool,
    },
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        total_rows: usize,
    },
}

/// What the UI shows about the loaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    pub name: String,
    pub kind: FileKind,
    pub size_bytes: usize,
    pub preview: Preview,
}

#[derive(Debug, Clone)]
pub struct Document {
    name: String,
    kind: FileKind,
    size_bytes: usize,
    text: String,
    table: Option<Table>,
}

impl Document {
    #[instrument(skip(bytes), fields(size = bytes.len()))]
    pub fn from_upload(
        name: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<Self, DocumentError> {
        let kind = FileKind::detect(name, content_type)?;
        if bytes.is_empty() {
            return Err(DocumentError::Empty {
                name: name.to_string(),
            });
        }

        let raw = std::str::from_utf8(bytes).map_err(|source| DocumentError::Encoding {
            name: name.to_string(),
            source,
        })?;

        let (text, table) = match kind {
            FileKind::Txt => (raw.to_string(), None),
            FileKind::Csv => {
                let table = Table::parse(name, raw)?;
                if table.headers.is_empty() && table.rows.is_empty() {
                    return Err(DocumentError::Empty {
                        name: name.to_string(),
                    });
                }
                (table.render(), Some(table))
            }
        };

        debug!(?kind, text_len = text.len(), "Extracted document text");

        Ok(Self {
            name: name.to_string(),
            kind,
            size_bytes: bytes.len(),
            text,
            table,
        })
    }

    /// Loads a local file, using its file name for type detection.
    pub fn from_path(path: &Path) -> Result<Self, DocumentError> {
        let bytes = std::fs::read(path).map_err(|source| DocumentError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_upload(&name, None, &bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// The text embedded into prompts.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn table(&self) -> Option<&Table> {
        self.table.as_ref()
    }

    pub fn preview(&self) -> Preview {
        match &self.table {
            Some(table) => Preview::Table {
                headers: table.headers.clone(),
                rows: table.rows.iter().take(CSV_PREVIEW_ROWS).cloned().collect(),
                total_rows: table.rows.len(),
            },
            None => match self.text.char_indices().nth(TEXT_PREVIEW_CHARS) {
                Some((cut, _)) => Preview::Text {
                    excerpt: format!("{}...", &self.text[..cut]),
                    truncated: true,
                },
                None => Preview::Text {
                    excerpt: self.text.clone(),
                    truncated: false,
                },
            },
        }
    }

    pub fn info(&self) -> DocumentInfo {
        DocumentInfo {
            name: self.name.clone(),
            kind: self.kind,
            size_bytes: self.size_bytes,
            preview: self.preview(),
        }
    }
}

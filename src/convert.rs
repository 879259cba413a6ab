//! Bridge to the Python document converter.
//!
//! Anything that is not plain text goes through an external script that
//! wraps IBM Docling and prints one JSON object on stdout. The bridge
//! spawns the interpreter, enforces a timeout, and maps every failure
//! mode onto [`EngineError::Conversion`] with the converter's own error
//! kind where it reports one.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::core::errors::EngineError;

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_OCR_LANGUAGES: &str = "en,vi";

/// One table the converter pulled out of the document. Entries for tables
/// the converter could not export carry an empty `markdown`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedTable {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub markdown: String,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub rows: usize,
    #[serde(default)]
    pub cols: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConfidenceGrades {
    #[serde(default)]
    pub mean: f64,
    #[serde(default)]
    pub low: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionMetadata {
    #[serde(default)]
    pub pages: u64,
    #[serde(default)]
    pub table_count: u64,
    #[serde(default)]
    pub confidence: ConfidenceGrades,
    #[serde(default)]
    pub processing_time: f64,
    #[serde(default)]
    pub file_size: u64,
}

/// Successful converter output.
#[derive(Debug, Clone, Default)]
pub struct Conversion {
    pub content: String,
    pub tables: Vec<ExtractedTable>,
    pub metadata: ConversionMetadata,
}

impl Conversion {
    /// Full text for ingestion: the converted markdown plus a trailing
    /// section with every exported table, so table rows are searchable
    /// alongside the prose.
    pub fn document_text(&self) -> String {
        let tables: Vec<&str> = self
            .tables
            .iter()
            .map(|table| table.markdown.trim())
            .filter(|markdown| !markdown.is_empty())
            .collect();
        if tables.is_empty() {
            return self.content.clone();
        }

        let mut text = self.content.trim_end().to_string();
        text.push_str("\n\n## Extracted Tables\n");
        for table in tables {
            text.push('\n');
            text.push_str(table);
            text.push('\n');
        }
        text
    }
}

#[derive(Debug, Deserialize)]
struct RawConversion {
    status: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    tables: Vec<ExtractedTable>,
    #[serde(default)]
    metadata: ConversionMetadata,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
}

pub struct Converter {
    python: PathBuf,
    script: PathBuf,
    timeout: Duration,
    enable_ocr: bool,
    ocr_languages: String,
}

impl Converter {
    /// Builds a converter around `script`. The interpreter is taken from
    /// `python` when set, otherwise `python3` then `python` from PATH.
    pub fn new(
        script: impl Into<PathBuf>,
        python: Option<PathBuf>,
    ) -> Result<Self, EngineError> {
        let python = match python {
            Some(path) => path,
            None => which::which("python3")
                .or_else(|_| which::which("python"))
                .map_err(|err| {
                    EngineError::conversion(
                        "PythonNotFoundError",
                        format!("no python interpreter on PATH: {err}"),
                    )
                })?,
        };
        Ok(Self {
            python,
            script: script.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            enable_ocr: false,
            ocr_languages: DEFAULT_OCR_LANGUAGES.to_string(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ocr(mut self, enabled: bool, languages: &str) -> Self {
        self.enable_ocr = enabled;
        if !languages.trim().is_empty() {
            self.ocr_languages = languages.to_string();
        }
        self
    }

    /// True when the script exists and the interpreter can import docling.
    pub async fn check_availability(&self) -> bool {
        if !tokio::fs::try_exists(&self.script).await.unwrap_or(false) {
            tracing::warn!(script = %self.script.display(), "converter script not found");
            return false;
        }
        let probe = Command::new(&self.python)
            .arg("-c")
            .arg("import docling; print('OK')")
            .stdin(Stdio::null())
            .output();
        match tokio::time::timeout(Duration::from_secs(30), probe).await {
            Ok(Ok(output)) => String::from_utf8_lossy(&output.stdout).trim() == "OK",
            Ok(Err(err)) => {
                tracing::warn!("converter probe failed to run: {err}");
                false
            }
            Err(_) => {
                tracing::warn!("converter probe timed out");
                false
            }
        }
    }

    /// Converts one file to markdown plus extracted tables.
    pub async fn convert(&self, file: &Path) -> Result<Conversion, EngineError> {
        if !tokio::fs::try_exists(file).await.unwrap_or(false) {
            return Err(EngineError::conversion(
                "FileNotFoundError",
                format!("file not found: {}", file.display()),
            ));
        }

        let mut command = Command::new(&self.python);
        command
            .arg(&self.script)
            .arg(file)
            .arg("--output-format")
            .arg("markdown")
            .arg("--enable-tables");
        if self.enable_ocr {
            command
                .arg("--enable-ocr")
                .arg("--ocr-lang")
                .arg(&self.ocr_languages);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(file = %file.display(), "running document converter");
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(EngineError::conversion(
                    "SpawnError",
                    format!("could not run {}: {err}", self.python.display()),
                ));
            }
            Err(_) => {
                return Err(EngineError::conversion(
                    "TimeoutError",
                    format!(
                        "conversion did not finish within {}s",
                        self.timeout.as_secs()
                    ),
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::conversion(
                "ProcessExitError",
                format!("converter exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        parse_output(&output.stdout)
    }
}

fn parse_output(stdout: &[u8]) -> Result<Conversion, EngineError> {
    let raw: RawConversion = serde_json::from_slice(stdout).map_err(|err| {
        EngineError::conversion(
            "OutputParseError",
            format!("converter output was not valid JSON: {err}"),
        )
    })?;

    if raw.status != "success" {
        return Err(EngineError::Conversion {
            kind: raw.error_type.unwrap_or_else(|| "UnknownError".to_string()),
            message: raw
                .error
                .unwrap_or_else(|| "converter reported an unspecified error".to_string()),
        });
    }

    Ok(Conversion {
        content: raw.content,
        tables: raw.tables,
        metadata: raw.metadata,
    })
}

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::HelperError;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TEXT: &str = "text/plain";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    PlainText,
}

impl DocumentFormat {
    /// Map a MIME type to a format. Parameters such as `; charset=utf-8` are
    /// ignored.
    pub fn from_mime(mime: &str) -> Result<Self, HelperError> {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            MIME_PDF => Ok(Self::Pdf),
            MIME_DOCX => Ok(Self::Docx),
            MIME_TEXT => Ok(Self::PlainText),
            _ => Err(HelperError::UnsupportedFormat(mime.to_string())),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, HelperError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "txt" => Ok(Self::PlainText),
            _ => Err(HelperError::UnsupportedFormat(path.display().to_string())),
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Pdf => MIME_PDF,
            Self::Docx => MIME_DOCX,
            Self::PlainText => MIME_TEXT,
        }
    }
}

/// Extract the plain text of a document. An empty upload yields empty text
/// for every format.
pub fn extract_text(format: DocumentFormat, bytes: &[u8]) -> Result<String, HelperError> {
    if bytes.is_empty() {
        return Ok(String::new());
    }

    let text = match format {
        DocumentFormat::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|err| HelperError::Document(format!("pdf: {err}")))?,
        DocumentFormat::Docx => docx_text(bytes)?,
        DocumentFormat::PlainText => {
            let text = std::str::from_utf8(bytes)
                .map_err(|err| HelperError::Document(format!("text is not valid UTF-8: {err}")))?;
            text.strip_prefix('\u{feff}').unwrap_or(text).to_string()
        }
    };

    debug!(?format, chars = text.chars().count(), "document text extracted");
    Ok(text)
}

fn docx_text(bytes: &[u8]) -> Result<String, HelperError> {
    let doc =
        docx_rs::read_docx(bytes).map_err(|err| HelperError::Document(format!("docx: {err}")))?;

    let mut content = String::new();
    for child in doc.document.children {
        if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
            for child in paragraph.children {
                if let docx_rs::ParagraphChild::Run(run) = child {
                    for child in run.children {
                        if let docx_rs::RunChild::Text(text) = child {
                            content.push_str(&text.text);
                        }
                    }
                }
            }
            content.push('\n');
        }
    }
    Ok(content)
}

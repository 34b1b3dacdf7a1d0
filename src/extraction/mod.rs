//! Upload validation and plain-text extraction per file type.
//!
//! Text, Markdown and HTML are extracted in-process. PDF, Word and image
//! files are accepted and stored but have no extractor, so they yield
//! empty text and no chunks.

#[cfg(test)]
mod tests;

use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use scraper::Html;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Elements whose text never reaches the extracted content
const SKIPPED_HTML_ELEMENTS: [&str; 5] = ["script", "style", "noscript", "template", "head"];

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("File size {size} bytes exceeds the {max} byte limit")]
    FileTooLarge { size: u64, max: u64 },
    #[error("File type {0} not supported. Allowed: {allowed}", allowed = FileKind::allowed_extensions())]
    UnsupportedType(String),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Accepted upload kinds, keyed by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Pdf,
    Docx,
    Text,
    Markdown,
    Html,
    Jpeg,
    Png,
}

impl FileKind {
    const EXTENSIONS: [(&'static str, FileKind); 9] = [
        (".pdf", FileKind::Pdf),
        (".docx", FileKind::Docx),
        (".txt", FileKind::Text),
        (".md", FileKind::Markdown),
        (".html", FileKind::Html),
        (".htm", FileKind::Html),
        (".jpg", FileKind::Jpeg),
        (".jpeg", FileKind::Jpeg),
        (".png", FileKind::Png),
    ];

    /// Kind for a filename, matching the extension case-insensitively
    #[inline]
    pub fn from_filename(filename: &str) -> Option<Self> {
        let extension = dotted_extension(filename)?;
        Self::EXTENSIONS
            .iter()
            .find(|(known, _)| *known == extension)
            .map(|(_, kind)| *kind)
    }

    #[inline]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Self::Text => "text/plain",
            Self::Markdown => "text/markdown",
            Self::Html => "text/html",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    /// Whether text can be extracted from this kind in-process
    #[inline]
    pub fn has_extractor(self) -> bool {
        matches!(self, Self::Text | Self::Markdown | Self::Html)
    }

    fn allowed_extensions() -> String {
        Self::EXTENSIONS
            .iter()
            .map(|(extension, _)| *extension)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for FileKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Lower-cased extension including the leading dot, e.g. `.md`
#[inline]
pub fn dotted_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
}

/// Check the size limit first, then the extension
#[inline]
pub fn validate_upload(filename: &str, size: u64, max_size: u64) -> Result<FileKind, ExtractionError> {
    if size > max_size {
        return Err(ExtractionError::FileTooLarge {
            size,
            max: max_size,
        });
    }

    FileKind::from_filename(filename).ok_or_else(|| {
        ExtractionError::UnsupportedType(
            dotted_extension(filename).unwrap_or_else(|| "(none)".to_string()),
        )
    })
}

/// Extract plain text from a stored file
#[inline]
pub fn extract_text(path: &Path, kind: FileKind) -> Result<String, ExtractionError> {
    if !kind.has_extractor() {
        warn!(
            "No text extractor for {} files, storing {} without content",
            kind,
            path.display()
        );
        return Ok(String::new());
    }

    let bytes = std::fs::read(path).map_err(|source| ExtractionError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let raw = decode_text(bytes);

    let text = match kind {
        FileKind::Markdown => markdown_to_text(&raw),
        FileKind::Html => html_to_text(&raw),
        _ => raw.trim().to_string(),
    };

    debug!(
        "Extracted {} characters from {}",
        text.chars().count(),
        path.display()
    );
    Ok(text)
}

/// UTF-8, replacing invalid sequences rather than failing
fn decode_text(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|e| {
        debug!("File is not valid UTF-8, decoding lossily");
        String::from_utf8_lossy(e.as_bytes()).into_owned()
    })
}

/// Render Markdown to plain text, dropping heading, emphasis, code and link
/// syntax while keeping their text
#[inline]
pub fn markdown_to_text(markdown: &str) -> String {
    let mut text = String::with_capacity(markdown.len());

    for event in Parser::new(markdown) {
        match event {
            Event::Text(content) | Event::Code(content) => text.push_str(&content),
            Event::SoftBreak | Event::HardBreak => text.push('\n'),
            Event::Start(Tag::Item) => {
                if !text.is_empty() && !text.ends_with('\n') {
                    text.push('\n');
                }
            }
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::CodeBlock
                | TagEnd::Item
                | TagEnd::BlockQuote(_)
                | TagEnd::TableRow
                | TagEnd::TableHead,
            ) => {
                if !text.ends_with('\n') {
                    text.push('\n');
                }
            }
            Event::End(TagEnd::TableCell) => text.push(' '),
            _ => {}
        }
    }

    text.trim().to_string()
}

/// Visible text of an HTML document with whitespace collapsed
#[inline]
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let pieces = document.root_element().descendants().filter_map(|node| {
        let text = node.value().as_text()?;
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|element| SKIPPED_HTML_ELEMENTS.contains(&element.name()))
        });
        (!hidden).then_some(&**text)
    });

    let mut text = String::new();
    for word in pieces.flat_map(str::split_whitespace) {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(word);
    }
    text
}

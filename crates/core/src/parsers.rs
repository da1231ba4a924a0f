use crate::error::PipelineError;
use crate::models::FileType;
use lopdf::Document as PdfDocument;
use regex::Regex;

/// Turns uploaded bytes into raw text for one file format.
pub trait DocumentParser {
    fn parse(&self, bytes: &[u8]) -> Result<String, PipelineError>;
}

#[derive(Default)]
pub struct PdfParser;

impl DocumentParser for PdfParser {
    fn parse(&self, bytes: &[u8]) -> Result<String, PipelineError> {
        let document =
            PdfDocument::load_mem(bytes).map_err(|error| PipelineError::Parse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| PipelineError::Parse(error.to_string()))?;
            if !text.trim().is_empty() {
                pages.push(text);
            }
        }

        if pages.is_empty() {
            return Err(PipelineError::Parse(
                "pdf had no readable page text".to_string(),
            ));
        }

        Ok(pages.join("\n\n"))
    }
}

/// Strips Markdown markup so downstream chunks carry prose, not syntax.
#[derive(Default)]
pub struct MarkdownParser;

impl DocumentParser for MarkdownParser {
    fn parse(&self, bytes: &[u8]) -> Result<String, PipelineError> {
        let raw = String::from_utf8_lossy(bytes);

        let fence = Regex::new(r"(?ms)^```[^\n]*\n(.*?)^```[ \t]*$")?;
        let image = Regex::new(r"!\[([^\]]*)\]\([^)]*\)")?;
        let link = Regex::new(r"\[([^\]]+)\]\([^)]*\)")?;
        let heading = Regex::new(r"(?m)^#{1,6}[ \t]+")?;
        let quote = Regex::new(r"(?m)^>[ \t]?")?;
        let emphasis = Regex::new(r"[*_]{1,3}([^*_]+)[*_]{1,3}")?;

        let text = fence.replace_all(&raw, "$1");
        let text = image.replace_all(&text, "$1");
        let text = link.replace_all(&text, "$1");
        let text = heading.replace_all(&text, "");
        let text = quote.replace_all(&text, "");
        let text = emphasis.replace_all(&text, "$1");

        Ok(text.replace('`', "").replace('\r', ""))
    }
}

#[derive(Default)]
pub struct PlainTextParser;

impl DocumentParser for PlainTextParser {
    fn parse(&self, bytes: &[u8]) -> Result<String, PipelineError> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

pub fn parse_document(file_type: FileType, bytes: &[u8]) -> Result<String, PipelineError> {
    match file_type {
        FileType::Pdf => PdfParser.parse(bytes),
        FileType::Markdown => MarkdownParser.parse(bytes),
        FileType::Text => PlainTextParser.parse(bytes),
    }
}

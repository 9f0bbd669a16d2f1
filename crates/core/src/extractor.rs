use crate::error::ExtractionError;
use crate::models::Document;
use crate::traits::TextExtractor;
use lopdf::Document as PdfDocument;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl TextExtractor for LopdfExtractor {
    fn extract(&self, document: &Document) -> Result<String, ExtractionError> {
        let pages = extract_page_texts(&document.filename, &document.bytes)?;
        let text = join_pages(&pages);

        if text.is_empty() {
            return Err(ExtractionError::NoText(document.filename.clone()));
        }

        Ok(text)
    }
}

/// Every page of the PDF in page order. A page whose text cannot be read
/// comes back with an empty string.
pub fn extract_page_texts(filename: &str, bytes: &[u8]) -> Result<Vec<PageText>, ExtractionError> {
    let document = PdfDocument::load_mem(bytes).map_err(|error| ExtractionError::Parse {
        filename: filename.to_string(),
        details: error.to_string(),
    })?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = match document.extract_text(&[page_no]) {
            Ok(text) => text,
            Err(error) => {
                debug!(filename, page = page_no, %error, "page has no extractable text");
                String::new()
            }
        };

        pages.push(PageText {
            number: page_no,
            text,
        });
    }

    Ok(pages)
}

pub fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<String>()
        .trim()
        .to_string()
}

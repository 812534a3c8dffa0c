use crate::error::IngestError;
use base64::{engine::general_purpose::STANDARD, Engine};
use calamine::{Reader, Xlsx};
use lopdf::Document;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};

const TEXT_EXTENSIONS: [&str; 11] = [
    "txt", "md", "json", "csv", "html", "css", "js", "cs", "sql", "py", "xml",
];

#[derive(Debug, Clone)]
pub struct Extracted {
    pub text: String,
    pub file_type: String,
}

pub fn is_supported(filename: &str) -> bool {
    match extension_of(filename) {
        Some(ext) => {
            matches!(ext.as_str(), "pdf" | "jpg" | "jpeg" | "png" | "docx" | "xlsx")
                || TEXT_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

fn extension_of(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Dispatches on the file extension. Unsupported extensions and empty
/// extraction results come back as their own error variants.
pub fn extract(bytes: &[u8], filename: &str) -> Result<Extracted, IngestError> {
    let extension = extension_of(filename)
        .ok_or_else(|| IngestError::UnsupportedFormat(filename.to_string()))?;

    let text = match extension.as_str() {
        "pdf" => extract_pdf_text(bytes)?,
        "jpg" | "jpeg" | "png" => extract_image_text(bytes)?,
        "docx" => extract_docx_text(bytes)?,
        "xlsx" => extract_xlsx_text(bytes)?,
        ext if TEXT_EXTENSIONS.contains(&ext) => String::from_utf8_lossy(bytes).into_owned(),
        _ => return Err(IngestError::UnsupportedFormat(filename.to_string())),
    };

    if text.trim().is_empty() {
        return Err(IngestError::EmptyDocument(filename.to_string()));
    }

    Ok(Extracted {
        text,
        file_type: extension,
    })
}

// A page that fails to parse is skipped; only a document with no
// readable text at all is reported empty.
fn extract_pdf_text(bytes: &[u8]) -> Result<String, IngestError> {
    let document = Document::load_mem(bytes)
        .map_err(|error| IngestError::Extraction(format!("pdf parse error: {error}")))?;

    let mut text = String::new();
    for (page_no, _object_id) in document.get_pages() {
        match document.extract_text(&[page_no]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(error) => {
                tracing::debug!(page = page_no, %error, "skipping unreadable pdf page");
            }
        }
    }

    Ok(text)
}

fn extract_docx_text(bytes: &[u8]) -> Result<String, IngestError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|error| IngestError::Extraction(format!("docx is not a valid archive: {error}")))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|error| IngestError::Extraction(format!("docx missing document part: {error}")))?
        .read_to_string(&mut xml)
        .map_err(IngestError::Io)?;

    Ok(collect_text_runs(&xml))
}

fn collect_text_runs(xml: &str) -> String {
    let mut result = String::new();
    let mut rest = xml;

    while let Some(open) = rest.find("<w:t") {
        let after = &rest[open + 4..];

        // `<w:tbl>`, `<w:tr>` and friends also start with "<w:t"; a real
        // text run continues with '>', an attribute list, or '/'.
        match after.chars().next() {
            Some('>') | Some(' ') | Some('/') => {}
            _ => {
                rest = after;
                continue;
            }
        }

        let Some(tag_close) = after.find('>') else {
            break;
        };

        if after[..tag_close].ends_with('/') {
            rest = &after[tag_close + 1..];
            continue;
        }

        let content = &after[tag_close + 1..];
        let Some(close) = content.find("</w:t>") else {
            break;
        };

        result.push_str(&content[..close]);
        rest = &content[close + 6..];
    }

    result
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

// A workbook with no readable sheet content falls through to the
// empty-document outcome instead of an error.
fn extract_xlsx_text(bytes: &[u8]) -> Result<String, IngestError> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes.to_vec()))
        .map_err(|error| IngestError::Extraction(format!("xlsx parse error: {error}")))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let mut text = String::new();

    for sheet_name in sheet_names {
        let Ok(range) = workbook.worksheet_range(&sheet_name) else {
            continue;
        };

        for row in range.rows() {
            let cells: Vec<String> = row
                .iter()
                .filter(|cell| !matches!(cell, calamine::Data::Empty))
                .map(|cell| cell.to_string())
                .collect();

            if !cells.is_empty() {
                text.push_str(&cells.join(" "));
                text.push('\n');
            }
        }
    }

    Ok(text)
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub language: String,
}

/// The language tag selects the trained model on the OCR side.
pub fn ocr_config_from_env() -> Option<OcrConfig> {
    let endpoint = std::env::var("OCR_ENDPOINT").ok()?;
    let endpoint = endpoint.trim().to_string();
    if endpoint.is_empty() {
        return None;
    }

    let api_key = std::env::var("OCR_API_KEY").ok().and_then(|value| {
        let key = value.trim().to_string();
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    });

    let language = std::env::var("OCR_LANGUAGE")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "por".to_string());

    Some(OcrConfig {
        endpoint,
        api_key,
        language,
    })
}

#[derive(Debug, Clone, Serialize)]
struct OcrRequest {
    image_base64: String,
    language: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrResponse {
    text: Option<String>,
}

fn extract_image_text(bytes: &[u8]) -> Result<String, IngestError> {
    let Some(config) = ocr_config_from_env() else {
        return Err(IngestError::OcrFailed(
            "no OCR endpoint configured (set OCR_ENDPOINT)".to_string(),
        ));
    };

    tokio::task::block_in_place(|| run_ocr(&config, bytes))
}

fn run_ocr(config: &OcrConfig, bytes: &[u8]) -> Result<String, IngestError> {
    let payload = OcrRequest {
        image_base64: STANDARD.encode(bytes),
        language: config.language.clone(),
    };

    let mut request = Client::new()
        .post(&config.endpoint)
        .header("content-type", "application/json")
        .json(&payload);

    if let Some(api_key) = &config.api_key {
        request = request.bearer_auth(api_key);
    }

    let response = request
        .send()
        .map_err(|error| IngestError::OcrFailed(error.to_string()))?;

    if !response.status().is_success() {
        return Err(IngestError::OcrFailed(format!(
            "OCR request to {} returned {}",
            config.endpoint,
            response.status()
        )));
    }

    let payload: OcrResponse = response
        .json()
        .map_err(|error| IngestError::OcrFailed(error.to_string()))?;

    Ok(payload.text.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_extensions_decode_verbatim() {
        let extracted = extract("linha um\nlinha dois".as_bytes(), "notas.txt").unwrap();
        assert_eq!(extracted.text, "linha um\nlinha dois");
        assert_eq!(extracted.file_type, "txt");
    }

    #[test]
    fn extension_dispatch_is_case_insensitive() {
        let extracted = extract(b"select 1;", "Consulta.SQL").unwrap();
        assert_eq!(extracted.file_type, "sql");
    }

    #[test]
    fn unsupported_extension_is_its_own_outcome() {
        let error = extract(b"\x00\x01", "video.mp4").unwrap_err();
        assert!(matches!(error, IngestError::UnsupportedFormat(_)));
        assert!(error.is_user_facing());
    }

    #[test]
    fn missing_extension_is_unsupported() {
        let error = extract(b"data", "Makefile").unwrap_err();
        assert!(matches!(error, IngestError::UnsupportedFormat(_)));
    }

    #[test]
    fn whitespace_only_document_reports_empty() {
        let error = extract(b"  \n\t ", "blank.txt").unwrap_err();
        assert!(matches!(error, IngestError::EmptyDocument(_)));
        assert!(error.is_user_facing());
    }

    #[test]
    fn text_runs_are_collected_across_paragraphs() {
        let xml = r#"<w:document><w:body>
            <w:p><w:r><w:t>Primeira</w:t></w:r><w:r><w:t xml:space="preserve"> parte</w:t></w:r></w:p>
            <w:p><w:r><w:t>Segunda &amp; final</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let text = collect_text_runs(xml);
        assert_eq!(text, "Primeira parteSegunda & final");
    }

    #[test]
    fn table_tags_are_not_mistaken_for_text_runs() {
        let xml = "<w:tbl><w:tr></w:tr></w:tbl><w:p><w:r><w:t>celula</w:t></w:r></w:p>";
        assert_eq!(collect_text_runs(xml), "celula");
    }

    #[test]
    fn corrupt_docx_is_an_extraction_error() {
        let error = extract(b"not a zip at all", "contrato.docx").unwrap_err();
        assert!(matches!(error, IngestError::Extraction(_)));
    }

    #[test]
    fn corrupt_pdf_is_an_extraction_error() {
        let error = extract(b"%PDF-broken", "laudo.pdf").unwrap_err();
        assert!(matches!(error, IngestError::Extraction(_)));
    }
}

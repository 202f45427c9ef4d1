//! Best-effort PDF export of a generated document.
//!
//! The layout is deliberately simple: body paragraphs and table rows set in
//! Helvetica on US Letter pages, word-wrapped on an estimated glyph width.
//! Images and most formatting are dropped.

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, StringFormat, dictionary};
use tracing::{debug, warn};

use crate::docx::runs::{PARAGRAPH, RUN, run_properties, run_text};
use crate::docx::xml::{self, XmlElement};
use crate::docx::{MAIN_PART, Package};
use crate::error::GenerationError;
use crate::placeholder::PLACEHOLDER_PATTERN;

const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 72.0;
const BODY_SIZE: f32 = 11.0;
const HEADING_SIZE: f32 = 14.0;
const LEADING: f32 = 1.3;
/// Average Helvetica advance as a fraction of the font size.
const AVERAGE_GLYPH_WIDTH: f32 = 0.52;

const REGULAR_FONT: &str = "F1";
const BOLD_FONT: &str = "F2";

/// A paragraph as a list of (text, bold) spans.
#[derive(Debug, Clone, Default)]
struct Block {
    spans: Vec<(String, bool)>,
    heading: bool,
}

impl Block {
    fn text(&self) -> String {
        self.spans.iter().map(|(t, _)| t.as_str()).collect()
    }

    /// Drop leftover placeholder tokens, which may span several runs.
    fn strip_placeholders(&mut self) {
        let text = self.text();
        let tokens: Vec<_> = PLACEHOLDER_PATTERN
            .find_iter(&text)
            .map(|m| m.range())
            .collect();
        if tokens.is_empty() {
            return;
        }
        let mut offset = 0;
        for (span, _) in &mut self.spans {
            let start = offset;
            offset += span.len();
            *span = span
                .char_indices()
                .filter(|(i, _)| !tokens.iter().any(|r| r.contains(&(start + i))))
                .map(|(_, c)| c)
                .collect();
        }
    }
}

/// Render a `.docx` package to PDF bytes.
///
/// # Errors
///
/// Returns [`GenerationError::Package`] if the package cannot be read and
/// [`GenerationError::Pdf`] if the PDF cannot be written.
pub fn render(docx: &[u8]) -> Result<Vec<u8>, GenerationError> {
    let mut package = Package::open(docx)?;
    let doc = xml::parse(MAIN_PART, &package.read(MAIN_PART)?)?;
    let body = doc.root.child("w:body").unwrap_or(&doc.root);

    let mut blocks = Vec::new();
    for element in body.elements() {
        if element.is(PARAGRAPH) {
            blocks.push(paragraph_block(element));
        } else if element.is("w:tbl") {
            blocks.extend(table_blocks(element));
        }
    }
    for block in &mut blocks {
        block.strip_placeholders();
    }

    let pages = layout(&blocks);
    debug!(blocks = blocks.len(), pages = pages.len(), "rendering PDF");
    write_pdf(pages)
}

fn paragraph_block(paragraph: &XmlElement) -> Block {
    let heading = paragraph
        .child("w:pPr")
        .and_then(|ppr| ppr.child("w:pStyle"))
        .and_then(|style| style.attr("w:val"))
        .is_some_and(|style| style.starts_with("Heading") || style == "Title");

    let mut spans = Vec::new();
    paragraph.visit(&mut |e| {
        if e.is(RUN) {
            let text = run_text(e);
            if !text.is_empty() {
                let bold = run_properties(e)
                    .and_then(|p| p.child("w:b"))
                    .is_some_and(|b| !matches!(b.attr("w:val"), Some("0" | "false")));
                spans.push((text, bold));
            }
        }
    });
    Block { spans, heading }
}

/// One block per table row, cells joined with ` | `.
fn table_blocks(table: &XmlElement) -> Vec<Block> {
    table
        .elements()
        .filter(|e| e.is("w:tr"))
        .map(|row| {
            let cells: Vec<String> = row
                .elements()
                .filter(|e| e.is("w:tc"))
                .map(|cell| {
                    let mut texts = Vec::new();
                    cell.visit(&mut |e| {
                        if e.is(PARAGRAPH) {
                            texts.push(paragraph_block(e).text());
                        }
                    });
                    texts.join(" ")
                })
                .collect();
            Block {
                spans: vec![(cells.join(" | "), false)],
                heading: false,
            }
        })
        .collect()
}

/// A laid-out line: position, size, and font-tagged chunks.
#[derive(Debug, Clone)]
struct Line {
    y: f32,
    size: f32,
    chunks: Vec<(String, bool)>,
}

#[allow(clippy::cast_precision_loss)]
fn estimated_width(text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * size * AVERAGE_GLYPH_WIDTH
}

fn layout(blocks: &[Block]) -> Vec<Vec<Line>> {
    let usable = PAGE_WIDTH - 2.0 * MARGIN;
    let mut pages: Vec<Vec<Line>> = vec![Vec::new()];
    let mut y = PAGE_HEIGHT - MARGIN;

    for block in blocks {
        let size = if block.heading { HEADING_SIZE } else { BODY_SIZE };
        let line_height = size * LEADING;
        let words: Vec<(String, bool)> = block
            .spans
            .iter()
            .flat_map(|(text, bold)| {
                text.split_whitespace()
                    .map(move |w| (w.to_owned(), *bold || block.heading))
            })
            .collect();

        let mut lines: Vec<Vec<(String, bool)>> = Vec::new();
        let mut current: Vec<(String, bool)> = Vec::new();
        let mut width = 0.0;
        for (word, bold) in words {
            let word_width = estimated_width(&word, size) + size * AVERAGE_GLYPH_WIDTH;
            if !current.is_empty() && width + word_width > usable {
                lines.push(std::mem::take(&mut current));
                width = 0.0;
            }
            width += word_width;
            current.push((word, bold));
        }
        if !current.is_empty() || lines.is_empty() {
            lines.push(current);
        }

        for words in lines {
            if y - line_height < MARGIN {
                pages.push(Vec::new());
                y = PAGE_HEIGHT - MARGIN;
            }
            y -= line_height;
            if let Some(page) = pages.last_mut() {
                page.push(Line {
                    y,
                    size,
                    chunks: chunk_words(words),
                });
            }
        }
        y -= size * 0.5;
    }
    pages
}

/// Merge consecutive words that share a font.
fn chunk_words(words: Vec<(String, bool)>) -> Vec<(String, bool)> {
    let mut chunks: Vec<(String, bool)> = Vec::new();
    for (word, bold) in words {
        match chunks.last_mut() {
            Some((text, last_bold)) if *last_bold == bold => {
                text.push(' ');
                text.push_str(&word);
            }
            Some((text, _)) => {
                text.push(' ');
                chunks.push((word, bold));
            }
            None => chunks.push((word, bold)),
        }
    }
    chunks
}

/// WinAnsi bytes for Helvetica. Characters outside Latin-1 become `?`.
/// Encode for the standard fonts, returning how many characters became `?`.
fn win_ansi(text: &str) -> (Vec<u8>, usize) {
    let mut replaced = 0;
    let bytes = text
        .chars()
        .map(|c| match u8::try_from(u32::from(c)) {
            Ok(b) if b >= 0x20 && !(0x80..0xA0).contains(&b) => b,
            _ => {
                replaced += 1;
                b'?'
            }
        })
        .collect();
    (bytes, replaced)
}

fn pdf_error(e: &lopdf::Error) -> GenerationError {
    GenerationError::Pdf {
        reason: e.to_string(),
    }
}

fn write_pdf(pages: Vec<Vec<Line>>) -> Result<Vec<u8>, GenerationError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources = doc.add_object(dictionary! {
        "Font" => dictionary! {
            REGULAR_FONT => regular,
            BOLD_FONT => bold,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    let mut replaced = 0;
    for lines in pages {
        let mut operations = Vec::new();
        for line in lines {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Td", vec![MARGIN.into(), line.y.into()]));
            for (text, is_bold) in line.chunks {
                let font = if is_bold { BOLD_FONT } else { REGULAR_FONT };
                operations.push(Operation::new("Tf", vec![font.into(), line.size.into()]));
                let (encoded, lost) = win_ansi(&text);
                replaced += lost;
                operations.push(Operation::new(
                    "Tj",
                    vec![Object::String(encoded, StringFormat::Literal)],
                ));
            }
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations }.encode().map_err(|e| pdf_error(&e))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id: ObjectId = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    if replaced > 0 {
        warn!(replaced, "characters outside Latin-1 replaced in PDF export");
    }

    let count = i64::try_from(kids.len()).unwrap_or(i64::MAX);
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog);

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| GenerationError::Pdf {
            reason: e.to_string(),
        })?;
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::docx::test_package;

    fn as_text(pdf: &[u8]) -> String {
        String::from_utf8_lossy(pdf).into_owned()
    }

    #[test]
    fn renders_paragraphs_and_tables() {
        let docx = test_package(concat!(
            "<w:p><w:pPr><w:pStyle w:val='Heading1'/></w:pPr><w:r><w:t>Offer</w:t></w:r></w:p>",
            "<w:p><w:r><w:t xml:space='preserve'>Hello Ana</w:t></w:r></w:p>",
            "<w:tbl><w:tr><w:tc><w:p><w:r><w:t>Role</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>Engineer</w:t></w:r></w:p></w:tc></w:tr></w:tbl>",
        ));
        let pdf = render(&docx).unwrap();
        assert!(pdf.starts_with(b"%PDF-1.5"));
        let text = as_text(&pdf);
        assert!(text.contains("(Hello Ana)"));
        assert!(text.contains("(Role | Engineer)"));
        assert!(text.contains("Helvetica-Bold"));

        let loaded = Document::load_mem(&pdf).unwrap();
        assert_eq!(loaded.get_pages().len(), 1);
    }

    #[test]
    fn leftover_placeholders_are_stripped() {
        let docx = test_package(
            "<w:p><w:r><w:t xml:space='preserve'>Sign {{boss_</w:t></w:r><w:r><w:t xml:space='preserve'>signature|signature}} here</w:t></w:r></w:p>",
        );
        let text = as_text(&render(&docx).unwrap());
        assert!(!text.contains("{{"));
        assert!(text.contains("(Sign here)"));
    }

    #[test]
    fn long_documents_paginate() {
        let body: String = (0..120)
            .map(|i| format!("<w:p><w:r><w:t>Paragraph {i}</w:t></w:r></w:p>"))
            .collect();
        let pdf = render(&test_package(&body)).unwrap();
        let loaded = Document::load_mem(&pdf).unwrap();
        assert!(loaded.get_pages().len() > 1);
    }

    #[test]
    fn non_latin_text_is_replaced() {
        assert_eq!(win_ansi("café ✓"), (b"caf\xe9 ?".to_vec(), 1));
        assert_eq!(win_ansi("Zoë"), (b"Zo\xeb".to_vec(), 0));
    }

    #[test]
    fn replaced_characters_still_render() {
        let pdf = render(&test_package("<w:p><w:r><w:t>Привет</w:t></w:r></w:p>")).unwrap();
        let loaded = Document::load_mem(&pdf).unwrap();
        assert_eq!(loaded.get_pages().len(), 1);
    }
}

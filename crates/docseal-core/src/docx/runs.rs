//! Paragraph text and run splicing.
//!
//! Authoring tools split text across runs freely (spell-check marks, edits,
//! formatting changes), so `{{name}}` can arrive as `{{na` + `me}}`. The
//! logical text of a paragraph is the concatenation of every run's `w:t`
//! text, and [`RunIndex`] maps byte ranges of that string back to the runs
//! that hold them. [`splice`] replaces a range with new runs while leaving
//! everything outside the range untouched.

use std::ops::Range;

use super::xml::{XmlElement, XmlNode};
use crate::error::PackageError;

pub(crate) const PARAGRAPH: &str = "w:p";
pub(crate) const RUN: &str = "w:r";
pub(crate) const RUN_PROPERTIES: &str = "w:rPr";
const TEXT: &str = "w:t";

/// Inline wrappers whose runs belong to the enclosing paragraph.
const RUN_CONTAINERS: [&str; 7] = [
    "w:hyperlink",
    "w:smartTag",
    "w:ins",
    "w:customXml",
    "w:sdt",
    "w:sdtContent",
    "w:fldSimple",
];

/// Visit every paragraph in document order.
pub(crate) fn for_each_paragraph<'a>(root: &'a XmlElement, f: &mut impl FnMut(&'a XmlElement)) {
    root.visit(&mut |element| {
        if element.is(PARAGRAPH) {
            f(element);
        }
    });
}

/// Visit every paragraph mutably. Paragraphs nested inside another
/// paragraph's runs (text boxes) are visited before their host.
pub(crate) fn for_each_paragraph_mut<E>(
    element: &mut XmlElement,
    f: &mut impl FnMut(&mut XmlElement) -> Result<(), E>,
) -> Result<(), E> {
    for child in &mut element.children {
        if let XmlNode::Element(child) = child {
            for_each_paragraph_mut(child, f)?;
            if child.is(PARAGRAPH) {
                f(child)?;
            }
        }
    }
    Ok(())
}

/// One run's position in the logical text.
#[derive(Debug, Clone)]
struct RunSlot {
    path: Vec<usize>,
    range: Range<usize>,
}

/// Logical text of a paragraph plus the runs behind it.
#[derive(Debug, Clone)]
pub(crate) struct RunIndex {
    text: String,
    runs: Vec<RunSlot>,
}

impl RunIndex {
    pub fn build(paragraph: &XmlElement) -> Self {
        let mut index = Self {
            text: String::new(),
            runs: Vec::new(),
        };
        index.collect(paragraph, &mut Vec::new());
        index
    }

    fn collect(&mut self, element: &XmlElement, path: &mut Vec<usize>) {
        for (i, child) in element.children.iter().enumerate() {
            let XmlNode::Element(child) = child else {
                continue;
            };
            path.push(i);
            if child.is(RUN) {
                let start = self.text.len();
                self.text.push_str(&run_text(child));
                self.runs.push(RunSlot {
                    path: path.clone(),
                    range: start..self.text.len(),
                });
            } else if RUN_CONTAINERS.contains(&child.name.as_str()) {
                self.collect(child, path);
            }
            path.pop();
        }
    }
}

/// Logical text of a paragraph.
pub(crate) fn paragraph_text(paragraph: &XmlElement) -> String {
    RunIndex::build(paragraph).text
}

/// Text carried by a run's `w:t` children.
pub(crate) fn run_text(run: &XmlElement) -> String {
    run.elements()
        .filter(|e| e.is(TEXT))
        .map(XmlElement::text)
        .collect()
}

/// A run's properties element, if any.
pub(crate) fn run_properties(run: &XmlElement) -> Option<&XmlElement> {
    run.child(RUN_PROPERTIES)
}

/// Properties of the run holding byte `offset` of the paragraph's logical
/// text.
pub(crate) fn properties_at(paragraph: &XmlElement, offset: usize) -> Option<XmlElement> {
    let index = RunIndex::build(paragraph);
    let slot = index.runs.iter().find(|slot| slot.range.contains(&offset))?;
    paragraph
        .at_path(&slot.path)
        .and_then(run_properties)
        .cloned()
}

/// A `w:t` element that keeps leading and trailing spaces.
pub(crate) fn text_element(text: &str) -> XmlElement {
    XmlElement::new(TEXT)
        .with_attr("xml:space", "preserve")
        .with_text(text)
}

/// A run with optional properties and the given content elements.
pub(crate) fn new_run(properties: Option<XmlElement>, content: Vec<XmlElement>) -> XmlElement {
    let mut run = XmlElement::new(RUN);
    if let Some(properties) = properties {
        run.children.push(XmlNode::Element(properties));
    }
    run.children
        .extend(content.into_iter().map(XmlNode::Element));
    run
}

/// Run content split into text and everything else.
#[derive(Debug, Clone)]
enum Piece {
    Text(String),
    Other(XmlNode),
}

fn pieces(run: &XmlElement) -> (Option<XmlElement>, Vec<Piece>) {
    let mut properties = None;
    let mut out = Vec::new();
    for child in &run.children {
        match child {
            XmlNode::Element(e) if e.is(RUN_PROPERTIES) => properties = Some(e.clone()),
            XmlNode::Element(e) if e.is(TEXT) => out.push(Piece::Text(e.text())),
            other => out.push(Piece::Other(other.clone())),
        }
    }
    (properties, out)
}

/// Split pieces around a local byte range. Non-text pieces inside the range
/// are dropped with it.
fn cut(pieces: Vec<Piece>, range: &Range<usize>) -> (Vec<Piece>, Vec<Piece>) {
    let mut before = Vec::new();
    let mut after = Vec::new();
    let mut offset = 0;

    for piece in pieces {
        match piece {
            Piece::Text(text) => {
                let start = offset;
                let end = offset + text.len();
                offset = end;

                let head_end = range.start.clamp(start, end) - start;
                let tail_start = range.end.clamp(start, end) - start;
                if let Some(head) = text.get(..head_end).filter(|s| !s.is_empty()) {
                    before.push(Piece::Text(head.to_owned()));
                }
                if let Some(tail) = text.get(tail_start..).filter(|s| !s.is_empty()) {
                    after.push(Piece::Text(tail.to_owned()));
                }
            }
            Piece::Other(node) => {
                if offset <= range.start {
                    before.push(Piece::Other(node));
                } else if offset >= range.end {
                    after.push(Piece::Other(node));
                }
            }
        }
    }
    (before, after)
}

fn rebuild(properties: Option<&XmlElement>, pieces: Vec<Piece>) -> Option<XmlElement> {
    if pieces.is_empty() {
        return None;
    }
    let mut run = XmlElement::new(RUN);
    if let Some(properties) = properties {
        run.children.push(XmlNode::Element(properties.clone()));
    }
    for piece in pieces {
        run.children.push(match piece {
            Piece::Text(text) => XmlNode::Element(text_element(&text)),
            Piece::Other(node) => node,
        });
    }
    Some(run)
}

fn stale() -> PackageError {
    PackageError::Xml {
        part: "paragraph".to_owned(),
        reason: "run index does not match the paragraph".to_owned(),
    }
}

/// Replace a byte range of the paragraph's logical text.
///
/// `build` receives the properties of the run where the range starts and
/// returns the runs to insert at that position. Text before and after the
/// range keeps its original runs and formatting.
pub(crate) fn splice(
    paragraph: &mut XmlElement,
    range: Range<usize>,
    build: impl FnOnce(Option<&XmlElement>) -> Vec<XmlElement>,
) -> Result<(), PackageError> {
    let index = RunIndex::build(paragraph);
    let affected: Vec<&RunSlot> = index
        .runs
        .iter()
        .filter(|slot| slot.range.start < range.end && slot.range.end > range.start)
        .collect();
    let Some((first, rest)) = affected.split_first() else {
        return Ok(());
    };

    // Later runs first, so removals never shift an index still to be used.
    for slot in rest.iter().rev() {
        let local = range.start.saturating_sub(slot.range.start)
            ..range.end.min(slot.range.end) - slot.range.start;
        let run = paragraph.at_path(&slot.path).ok_or_else(stale)?;
        let (properties, content) = pieces(run);
        let (before, after) = cut(content, &local);
        let kept: Vec<Piece> = before.into_iter().chain(after).collect();
        replace_at(paragraph, &slot.path, rebuild(properties.as_ref(), kept).into_iter().collect())?;
    }

    let local = range.start - first.range.start..range.end.min(first.range.end) - first.range.start;
    let run = paragraph.at_path(&first.path).ok_or_else(stale)?;
    let (properties, content) = pieces(run);
    let (before, after) = cut(content, &local);

    let mut replacement: Vec<XmlElement> = Vec::new();
    replacement.extend(rebuild(properties.as_ref(), before));
    replacement.extend(build(properties.as_ref()));
    replacement.extend(rebuild(properties.as_ref(), after));
    replace_at(paragraph, &first.path, replacement)
}

fn replace_at(
    root: &mut XmlElement,
    path: &[usize],
    replacement: Vec<XmlElement>,
) -> Result<(), PackageError> {
    let (&last, parent_path) = path.split_last().ok_or_else(stale)?;
    let parent = root.at_path_mut(parent_path).ok_or_else(stale)?;
    if last >= parent.children.len() {
        return Err(stale());
    }
    parent
        .children
        .splice(last..=last, replacement.into_iter().map(XmlNode::Element));
    Ok(())
}

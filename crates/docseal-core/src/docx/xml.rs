//! Minimal owned XML tree over `quick-xml`.
//!
//! WordprocessingML parts are small enough to hold in memory, and the run
//! splicing in [`super::runs`] needs random access to siblings, so parts are
//! parsed into [`XmlElement`] trees and written back out. Qualified names
//! (`w:p`, `wp:inline`) are kept verbatim; namespaces are not resolved.
//! Comments and processing instructions are dropped.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::PackageError;

/// A node in a parsed part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// An element with its attributes in document order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct XmlElement {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

/// A parsed part.
#[derive(Debug, Clone)]
pub(crate) struct XmlDocument {
    pub has_declaration: bool,
    pub root: XmlElement,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.attrs.push((key.to_owned(), value)),
        }
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.is(name))
    }

    /// Concatenated text of direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                XmlNode::Text(t) => Some(t.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    /// Walk to a descendant by child indices.
    pub fn at_path_mut(&mut self, path: &[usize]) -> Option<&mut XmlElement> {
        let mut current = self;
        for &index in path {
            current = match current.children.get_mut(index)? {
                XmlNode::Element(e) => e,
                XmlNode::Text(_) => return None,
            };
        }
        Some(current)
    }

    pub fn at_path(&self, path: &[usize]) -> Option<&XmlElement> {
        let mut current = self;
        for &index in path {
            current = match current.children.get(index)? {
                XmlNode::Element(e) => e,
                XmlNode::Text(_) => return None,
            };
        }
        Some(current)
    }

    /// Visit every descendant element, parents before children.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a XmlElement)) {
        for child in self.elements() {
            f(child);
            child.visit(f);
        }
    }

    /// Parse a standalone fragment such as a run built from a template string.
    pub fn parse_fragment(xml: &str) -> Result<Self, PackageError> {
        parse("fragment", xml.as_bytes()).map(|doc| doc.root)
    }
}

/// Parse a part into a tree.
pub(crate) fn parse(part: &str, bytes: &[u8]) -> Result<XmlDocument, PackageError> {
    let xml_err = |reason: String| PackageError::Xml {
        part: part.to_owned(),
        reason,
    };

    let text = std::str::from_utf8(bytes).map_err(|e| xml_err(e.to_string()))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = Reader::from_str(text);

    let mut has_declaration = false;
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event().map_err(|e| xml_err(e.to_string()))? {
            Event::Decl(_) => has_declaration = true,
            Event::Start(start) => stack.push(element_from(&start).map_err(xml_err)?),
            Event::Empty(start) => {
                let element = element_from(&start).map_err(xml_err)?;
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| xml_err("unbalanced end tag".to_owned()))?;
                attach(&mut stack, &mut root, element);
            }
            Event::Text(t) => {
                if let Some(parent) = stack.last_mut() {
                    let value = t.unescape().map_err(|e| xml_err(e.to_string()))?;
                    parent.children.push(XmlNode::Text(value.into_owned()));
                }
            }
            Event::CData(c) => {
                if let Some(parent) = stack.last_mut() {
                    let value = String::from_utf8_lossy(&c.into_inner()).into_owned();
                    parent.children.push(XmlNode::Text(value));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(xml_err("unclosed element at end of part".to_owned()));
    }
    let root = root.ok_or_else(|| xml_err("part has no root element".to_owned()))?;
    Ok(XmlDocument {
        has_declaration,
        root,
    })
}

fn element_from(start: &BytesStart<'_>) -> Result<XmlElement, String> {
    let mut element = XmlElement::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        element.attrs.push((key, value.into_owned()));
    }
    Ok(element)
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

/// Serialize a tree back to bytes.
pub(crate) fn write(part: &str, doc: &XmlDocument) -> Result<Vec<u8>, PackageError> {
    let write_err = |e: &dyn std::fmt::Display| PackageError::Write {
        reason: format!("{part}: {e}"),
    };

    let mut writer = Writer::new(Vec::new());
    if doc.has_declaration {
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
            .map_err(|e| write_err(&e))?;
        writer.get_mut().extend_from_slice(b"\r\n");
    }
    write_element(&mut writer, &doc.root).map_err(|e| write_err(&e))?;
    Ok(writer.into_inner())
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &XmlElement) -> Result<(), String> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attrs {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        return writer
            .write_event(Event::Empty(start))
            .map_err(|e| e.to_string());
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| e.to_string())?;
    for child in &element.children {
        match child {
            XmlNode::Element(e) => write_element(writer, e)?,
            XmlNode::Text(t) => writer
                .write_event(Event::Text(BytesText::new(t)))
                .map_err(|e| e.to_string())?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(|e| e.to_string())
}

//! WordprocessingML (`.docx`) package handling.
//!
//! A `.docx` file is a zip archive of XML parts. [`Package`] reads the
//! archive once, lets callers replace or add parts, and re-assembles it:
//! untouched entries are copied raw, rewritten and added entries are
//! deflated with a fixed timestamp. The same inputs therefore always produce
//! the same bytes.

pub(crate) mod parts;
pub(crate) mod runs;
pub(crate) mod xml;

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::error::PackageError;

/// The main document part.
pub const MAIN_PART: &str = "word/document.xml";

/// The content-types part every package carries.
pub(crate) const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

/// Signature of a zip local file header.
pub const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// An opened package with pending modifications.
pub(crate) struct Package {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    names: Vec<String>,
    replaced: BTreeMap<String, Vec<u8>>,
    added: Vec<(String, Vec<u8>)>,
}

impl Package {
    /// Open a package from bytes. The main document part must exist.
    pub fn open(bytes: &[u8]) -> Result<Self, PackageError> {
        let archive =
            ZipArchive::new(Cursor::new(bytes.to_vec())).map_err(|e| PackageError::Archive {
                reason: e.to_string(),
            })?;
        let names: Vec<String> = (0..archive.len())
            .filter_map(|index| archive.name_for_index(index).map(str::to_owned))
            .collect();

        if !names.iter().any(|n| n == MAIN_PART) {
            return Err(PackageError::MissingPart {
                part: MAIN_PART.to_owned(),
            });
        }

        Ok(Self {
            archive,
            names,
            replaced: BTreeMap::new(),
            added: Vec::new(),
        })
    }

    /// Whether a part exists, including parts added since opening.
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name) || self.added.iter().any(|(n, _)| n == name)
    }

    /// Read a part's current bytes.
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>, PackageError> {
        if let Some(bytes) = self.replaced.get(name) {
            return Ok(bytes.clone());
        }
        if let Some((_, bytes)) = self.added.iter().find(|(n, _)| n == name) {
            return Ok(bytes.clone());
        }

        let mut file = self.archive.by_name(name).map_err(|e| match e {
            zip::result::ZipError::FileNotFound => PackageError::MissingPart {
                part: name.to_owned(),
            },
            other => PackageError::Archive {
                reason: format!("{name}: {other}"),
            },
        })?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| PackageError::Archive {
                reason: format!("{name}: {e}"),
            })?;
        Ok(bytes)
    }

    /// Replace an existing part or add a new one.
    pub fn write(&mut self, name: &str, bytes: Vec<u8>) {
        if self.names.iter().any(|n| n == name) {
            self.replaced.insert(name.to_owned(), bytes);
        } else if let Some(entry) = self.added.iter_mut().find(|(n, _)| n == name) {
            entry.1 = bytes;
        } else {
            self.added.push((name.to_owned(), bytes));
        }
    }

    /// Parts that carry paragraph text: the main document, then headers
    /// and footers in archive order.
    pub fn content_parts(&self) -> Vec<String> {
        let mut parts = vec![MAIN_PART.to_owned()];
        parts.extend(
            self.names
                .iter()
                .filter(|n| is_header_or_footer(n))
                .cloned(),
        );
        parts
    }

    /// Re-assemble the archive.
    pub fn finish(mut self) -> Result<Vec<u8>, PackageError> {
        let write_err = |e: &dyn std::fmt::Display| PackageError::Write {
            reason: e.to_string(),
        };

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for index in 0..self.archive.len() {
            let file = self
                .archive
                .by_index_raw(index)
                .map_err(|e| write_err(&e))?;
            let name = file.name().to_owned();
            match self.replaced.remove(&name) {
                Some(bytes) => {
                    drop(file);
                    writer
                        .start_file(name.as_str(), entry_options())
                        .map_err(|e| write_err(&e))?;
                    writer.write_all(&bytes).map_err(|e| write_err(&e))?;
                }
                None => writer.raw_copy_file(file).map_err(|e| write_err(&e))?,
            }
        }

        for (name, bytes) in &self.added {
            writer
                .start_file(name.as_str(), entry_options())
                .map_err(|e| write_err(&e))?;
            writer.write_all(bytes).map_err(|e| write_err(&e))?;
        }

        let cursor = writer.finish().map_err(|e| write_err(&e))?;
        Ok(cursor.into_inner())
    }
}

/// Logical text of every paragraph in the content parts, in order.
///
/// # Errors
///
/// Returns [`PackageError`] if the package or one of its parts is unreadable.
pub fn document_text(bytes: &[u8]) -> Result<Vec<String>, PackageError> {
    let mut package = Package::open(bytes)?;
    let mut paragraphs = Vec::new();
    for part in package.content_parts() {
        let doc = xml::parse(&part, &package.read(&part)?)?;
        runs::for_each_paragraph(&doc.root, &mut |p| paragraphs.push(runs::paragraph_text(p)));
    }
    Ok(paragraphs)
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("parts", &self.names.len())
            .field("replaced", &self.replaced.keys().collect::<Vec<_>>())
            .field("added", &self.added.len())
            .finish_non_exhaustive()
    }
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
}

fn is_header_or_footer(name: &str) -> bool {
    let Some(file) = name.strip_prefix("word/") else {
        return false;
    };
    !file.contains('/')
        && file.ends_with(".xml")
        && (file.starts_with("header") || file.starts_with("footer"))
}

/// Build a minimal package around a `word/document.xml` body. Used by tests
/// across the crate.
#[cfg(test)]
pub(crate) fn test_package(body_xml: &str) -> Vec<u8> {
    test_package_with_parts(body_xml, &[])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) fn test_package_with_parts(body_xml: &str, extra: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let content_types = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;
    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><w:body>{body_xml}<w:sectPr/></w:body></w:document>"#
    );
    let mut parts: Vec<(&str, String)> = vec![
        (CONTENT_TYPES_PART, content_types.to_owned()),
        (MAIN_PART, document),
    ];
    parts.extend(extra.iter().map(|(n, c)| (*n, (*c).to_owned())));
    for (name, content) in parts {
        writer.start_file(name, entry_options()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

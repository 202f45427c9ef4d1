//! Package plumbing for embedded images: content types, part
//! relationships, and inline drawing runs.

use super::xml::{self, XmlDocument, XmlElement, XmlNode};
use super::{CONTENT_TYPES_PART, Package};
use crate::error::PackageError;

const RELATIONSHIPS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const IMAGE_RELATIONSHIP: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
const WP_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing";
const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// English Metric Units per inch.
pub(crate) const EMU_PER_INCH: u64 = 914_400;
/// English Metric Units per point.
pub(crate) const EMU_PER_POINT: u64 = 12_700;

/// `word/document.xml` has its relationships in `word/_rels/document.xml.rels`.
pub(crate) fn relationships_part(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Make sure `[Content_Types].xml` declares a default for the extension.
pub(crate) fn ensure_default_content_type(
    package: &mut Package,
    extension: &str,
    content_type: &str,
) -> Result<(), PackageError> {
    let bytes = package.read(CONTENT_TYPES_PART)?;
    let mut doc = xml::parse(CONTENT_TYPES_PART, &bytes)?;
    let declared = doc.root.elements().any(|e| {
        e.is("Default")
            && e.attr("Extension")
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
    });
    if declared {
        return Ok(());
    }

    let default = XmlElement::new("Default")
        .with_attr("Extension", extension)
        .with_attr("ContentType", content_type);
    // Defaults conventionally precede overrides.
    let position = doc
        .root
        .children
        .iter()
        .position(|c| matches!(c, XmlNode::Element(e) if e.is("Override")))
        .unwrap_or(doc.root.children.len());
    doc.root
        .children
        .insert(position, XmlNode::Element(default));
    package.write(CONTENT_TYPES_PART, xml::write(CONTENT_TYPES_PART, &doc)?);
    Ok(())
}

/// Add an image relationship from `part` to `target` (relative to the
/// part's directory) and return the new relationship id.
pub(crate) fn add_image_relationship(
    package: &mut Package,
    part: &str,
    target: &str,
) -> Result<String, PackageError> {
    let rels_part = relationships_part(part);
    let mut doc = if package.contains(&rels_part) {
        let bytes = package.read(&rels_part)?;
        xml::parse(&rels_part, &bytes)?
    } else {
        XmlDocument {
            has_declaration: true,
            root: XmlElement::new("Relationships").with_attr("xmlns", RELATIONSHIPS_NS),
        }
    };

    let next = doc
        .root
        .elements()
        .filter_map(|e| e.attr("Id"))
        .filter_map(|id| id.strip_prefix("rId"))
        .filter_map(|n| n.parse::<u32>().ok())
        .max()
        .unwrap_or(0)
        + 1;
    let id = format!("rId{next}");

    doc.root.children.push(XmlNode::Element(
        XmlElement::new("Relationship")
            .with_attr("Id", id.as_str())
            .with_attr("Type", IMAGE_RELATIONSHIP)
            .with_attr("Target", target),
    ));
    package.write(&rels_part, xml::write(&rels_part, &doc)?);
    Ok(id)
}

/// Declare the `wp` and `r` prefixes on the part root if the template
/// did not.
pub(crate) fn ensure_drawing_namespaces(root: &mut XmlElement) {
    if root.attr("xmlns:wp").is_none() {
        root.set_attr("xmlns:wp", WP_NS);
    }
    if root.attr("xmlns:r").is_none() {
        root.set_attr("xmlns:r", R_NS);
    }
}

/// Highest `wp:docPr` id in a part, so new drawings get unique ids.
pub(crate) fn max_drawing_id(root: &XmlElement) -> u32 {
    let mut max = 0;
    root.visit(&mut |e| {
        if e.is("wp:docPr") {
            if let Some(id) = e.attr("id").and_then(|v| v.parse::<u32>().ok()) {
                max = max.max(id);
            }
        }
    });
    max
}

/// An inline picture referencing an image relationship.
#[derive(Debug, Clone)]
pub(crate) struct InlinePicture<'a> {
    pub relationship_id: &'a str,
    pub drawing_id: u32,
    pub name: &'a str,
    pub width_emu: u64,
    pub height_emu: u64,
}

impl InlinePicture<'_> {
    /// The `w:drawing` element for this picture.
    pub fn to_drawing(&self) -> Result<XmlElement, PackageError> {
        let Self {
            relationship_id,
            drawing_id,
            name,
            width_emu: cx,
            height_emu: cy,
        } = self;
        let name = escape_attr(name);
        let drawing = format!(
            r#"<w:drawing><wp:inline distT="0" distB="0" distL="0" distR="0"><wp:extent cx="{cx}" cy="{cy}"/><wp:effectExtent l="0" t="0" r="0" b="0"/><wp:docPr id="{drawing_id}" name="{name}"/><wp:cNvGraphicFramePr><a:graphicFrameLocks xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" noChangeAspect="1"/></wp:cNvGraphicFramePr><a:graphic xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main"><a:graphicData uri="http://schemas.openxmlformats.org/drawingml/2006/picture"><pic:pic xmlns:pic="http://schemas.openxmlformats.org/drawingml/2006/picture"><pic:nvPicPr><pic:cNvPr id="{drawing_id}" name="{name}"/><pic:cNvPicPr/></pic:nvPicPr><pic:blipFill><a:blip r:embed="{relationship_id}"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill><pic:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom></pic:spPr></pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing>"#
        );
        XmlElement::parse_fragment(&drawing)
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

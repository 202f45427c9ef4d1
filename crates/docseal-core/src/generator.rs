//! Document generation.
//!
//! Replaces every well-formed placeholder in a template with its value and
//! returns the new package. Malformed tokens are left as written. Text
//! values inherit the formatting of the run the placeholder starts in;
//! signature fields become inline pictures once an image is supplied.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::ops::Range;

use image::{ImageFormat, ImageReader};
use tracing::{debug, info};

use crate::docx::parts::{
    EMU_PER_INCH, EMU_PER_POINT, InlinePicture, add_image_relationship,
    ensure_default_content_type, ensure_drawing_namespaces, max_drawing_id,
};
use crate::docx::runs::{
    RUN_PROPERTIES, for_each_paragraph_mut, new_run, paragraph_text, properties_at, splice,
    text_element,
};
use crate::docx::xml::{self, XmlElement, XmlNode};
use crate::docx::Package;
use crate::error::GenerationError;
use crate::placeholder::{FieldType, PLACEHOLDER_PATTERN, TemplateField};
use crate::richtext::{self, RichSegment, RunFormat};
use crate::schema::FieldValues;

/// Signature images keyed by signature field name.
pub type SignatureImages = BTreeMap<String, Vec<u8>>;

/// Font size assumed when a run does not set one, in half-points.
const DEFAULT_HALF_POINTS: u64 = 22;
/// Signature pictures are this many text lines tall.
const SIGNATURE_LINES: u64 = 3;
const MAX_SIGNATURE_WIDTH_EMU: u64 = 2 * EMU_PER_INCH;

/// Child order of `w:rPr` required by the schema.
const RUN_PROPERTY_ORDER: [&str; 39] = [
    "w:rStyle", "w:rFonts", "w:b", "w:bCs", "w:i", "w:iCs", "w:caps", "w:smallCaps",
    "w:strike", "w:dstrike", "w:outline", "w:shadow", "w:emboss", "w:imprint", "w:noProof",
    "w:snapToGrid", "w:vanish", "w:webHidden", "w:color", "w:spacing", "w:w", "w:kern",
    "w:position", "w:sz", "w:szCs", "w:highlight", "w:u", "w:effect", "w:bdr", "w:shd",
    "w:fitText", "w:vertAlign", "w:rtl", "w:cs", "w:em", "w:lang", "w:eastAsianLayout",
    "w:specVanish", "w:oMath",
];

/// Produce a document from `template`.
///
/// `fields` is the template's scanned field list; it decides how each
/// placeholder renders. Signature fields with an entry in `images` are
/// stamped with that image, the rest are blanked.
///
/// # Errors
///
/// Returns [`GenerationError::Package`] for a corrupt template and
/// [`GenerationError::UnsupportedImage`] for an image that is not a PNG or
/// JPEG.
pub fn generate(
    template: &[u8],
    fields: &[TemplateField],
    values: &FieldValues,
    images: &SignatureImages,
) -> Result<Vec<u8>, GenerationError> {
    let decoded = images
        .iter()
        .map(|(field, bytes)| Ok((field.as_str(), DecodedImage::decode(field, bytes)?)))
        .collect::<Result<BTreeMap<_, _>, GenerationError>>()?;

    let mut package = Package::open(template)?;
    let mut media = BTreeMap::new();
    let mut total = 0;

    let mut parts = Vec::new();
    for part in package.content_parts() {
        let bytes = package.read(&part)?;
        let doc = xml::parse(&part, &bytes)?;
        parts.push((part, doc));
    }
    // `wp:docPr` ids must be unique across the whole package, headers and
    // footers included.
    let mut next_drawing_id = parts
        .iter()
        .map(|(_, doc)| max_drawing_id(&doc.root))
        .max()
        .unwrap_or(0)
        + 1;

    for (part, mut doc) in parts {
        let mut pass = PartPass {
            part: &part,
            fields,
            values,
            images: &decoded,
            package: &mut package,
            media: &mut media,
            relationships: BTreeMap::new(),
            next_drawing_id,
            replaced: 0,
        };
        for_each_paragraph_mut(&mut doc.root, &mut |p| pass.paragraph(p))?;
        next_drawing_id = pass.next_drawing_id;
        let replaced = pass.replaced;
        let embedded = !pass.relationships.is_empty();

        if embedded {
            ensure_drawing_namespaces(&mut doc.root);
        }
        if replaced > 0 {
            debug!(part = %part, replaced, "part rewritten");
            package.write(&part, xml::write(&part, &doc)?);
        }
        total += replaced;
    }

    info!(placeholders = total, images = media.len(), "document generated");
    Ok(package.finish()?)
}

#[derive(Debug)]
struct DecodedImage<'a> {
    bytes: &'a [u8],
    extension: &'static str,
    content_type: &'static str,
    width: u32,
    height: u32,
}

impl<'a> DecodedImage<'a> {
    fn decode(field: &str, bytes: &'a [u8]) -> Result<Self, GenerationError> {
        let unsupported = |reason: String| GenerationError::UnsupportedImage {
            field: field.to_owned(),
            reason,
        };
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| unsupported(e.to_string()))?;
        let (extension, content_type) = match reader.format() {
            Some(ImageFormat::Png) => ("png", "image/png"),
            Some(ImageFormat::Jpeg) => ("jpeg", "image/jpeg"),
            Some(other) => return Err(unsupported(format!("{other:?} images are not supported"))),
            None => return Err(unsupported("unrecognized image data".to_owned())),
        };
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| unsupported(e.to_string()))?;
        if width == 0 || height == 0 {
            return Err(unsupported("image has no pixels".to_owned()));
        }
        Ok(Self {
            bytes,
            extension,
            content_type,
            width,
            height,
        })
    }

    /// Size in EMU for a picture three lines of `half_points` text tall,
    /// capped in width.
    fn extent(&self, half_points: u64) -> (u64, u64) {
        let (w, h) = (u64::from(self.width), u64::from(self.height));
        let height = SIGNATURE_LINES * half_points * EMU_PER_POINT / 2;
        let width = height * w / h;
        if width > MAX_SIGNATURE_WIDTH_EMU {
            (MAX_SIGNATURE_WIDTH_EMU, MAX_SIGNATURE_WIDTH_EMU * h / w)
        } else {
            (width, height)
        }
    }
}

/// Substitution state for one content part.
struct PartPass<'p, 'i> {
    part: &'p str,
    fields: &'p [TemplateField],
    values: &'p FieldValues,
    images: &'p BTreeMap<&'i str, DecodedImage<'i>>,
    package: &'p mut Package,
    /// Field name to media part, shared across parts.
    media: &'p mut BTreeMap<String, String>,
    /// Field name to relationship id within this part.
    relationships: BTreeMap<String, String>,
    next_drawing_id: u32,
    replaced: usize,
}

impl PartPass<'_, '_> {
    fn paragraph(&mut self, paragraph: &mut XmlElement) -> Result<(), GenerationError> {
        let text = paragraph_text(paragraph);
        if !text.contains("{{") {
            return Ok(());
        }
        let tokens: Vec<(Range<usize>, TemplateField)> = PLACEHOLDER_PATTERN
            .captures_iter(&text)
            .filter_map(|caps| {
                let (token, inner) = (caps.get(0)?, caps.get(1)?);
                TemplateField::parse_inner(token.as_str(), inner.as_str())
                    .ok()
                    .map(|field| (token.range(), field))
            })
            .collect();

        // Back to front, so earlier ranges stay valid.
        for (range, token) in tokens.into_iter().rev() {
            let field_type = self
                .fields
                .iter()
                .find(|f| f.name == token.name)
                .map_or(token.field_type, |f| f.field_type);

            if field_type == FieldType::Signature {
                self.signature(paragraph, range, &token.name)?;
            } else {
                let value = self
                    .values
                    .get(&token.name)
                    .map(crate::schema::FieldValue::render)
                    .unwrap_or_default();
                splice(paragraph, range, |props| text_runs(props, &value))?;
            }
            self.replaced += 1;
        }
        Ok(())
    }

    fn signature(
        &mut self,
        paragraph: &mut XmlElement,
        range: Range<usize>,
        field: &str,
    ) -> Result<(), GenerationError> {
        let images = self.images;
        let Some(image) = images.get(field) else {
            splice(paragraph, range, |props| {
                vec![new_run(props.cloned(), vec![text_element("")])]
            })?;
            return Ok(());
        };

        let half_points = properties_at(paragraph, range.start)
            .as_ref()
            .and_then(|props| props.child("w:sz"))
            .and_then(|sz| sz.attr("w:val"))
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_HALF_POINTS);
        let (width_emu, height_emu) = image.extent(half_points);

        let relationship_id = self.relationship(field, image)?;
        let drawing_id = self.next_drawing_id;
        self.next_drawing_id += 1;
        let name = format!("Signature {field}");
        let drawing = InlinePicture {
            relationship_id: &relationship_id,
            drawing_id,
            name: &name,
            width_emu,
            height_emu,
        }
        .to_drawing()?;

        splice(paragraph, range, |props| vec![new_run(props.cloned(), vec![drawing])])?;
        Ok(())
    }

    /// Relationship id of the field's image from this part, embedding the
    /// media on first use.
    fn relationship(
        &mut self,
        field: &str,
        image: &DecodedImage<'_>,
    ) -> Result<String, GenerationError> {
        if let Some(id) = self.relationships.get(field) {
            return Ok(id.clone());
        }

        let media_part = match self.media.get(field) {
            Some(path) => path.clone(),
            None => {
                let path = (1..)
                    .map(|n| format!("word/media/signature_{field}_{n}.{}", image.extension))
                    .find(|path| !self.package.contains(path))
                    .unwrap_or_default();
                self.package.write(&path, image.bytes.to_vec());
                ensure_default_content_type(self.package, image.extension, image.content_type)?;
                self.media.insert(field.to_owned(), path.clone());
                path
            }
        };

        let target = match self.part.rsplit_once('/') {
            Some((dir, _)) => media_part
                .strip_prefix(&format!("{dir}/"))
                .map_or_else(|| format!("/{media_part}"), str::to_owned),
            None => media_part.clone(),
        };
        let id = add_image_relationship(self.package, self.part, &target)?;
        self.relationships.insert(field.to_owned(), id.clone());
        Ok(id)
    }
}

/// Runs rendering a text value. HTML values go through the rich-text
/// converter; plain values are inserted verbatim with newlines as breaks.
fn text_runs(props: Option<&XmlElement>, value: &str) -> Vec<XmlElement> {
    if value.is_empty() {
        return Vec::new();
    }
    if !richtext::contains_html(value) {
        return vec![new_run(props.cloned(), line_content(value))];
    }

    richtext::parse(value)
        .into_iter()
        .map(|segment| match segment {
            RichSegment::Text { text, format } => {
                new_run(formatted_properties(props, &format), line_content(&text))
            }
            RichSegment::LineBreak => new_run(props.cloned(), vec![XmlElement::new("w:br")]),
        })
        .collect()
}

fn line_content(text: &str) -> Vec<XmlElement> {
    let mut content = Vec::new();
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            content.push(XmlElement::new("w:br"));
        }
        content.push(text_element(line.strip_suffix('\r').unwrap_or(line)));
    }
    content
}

/// `base` with the format's flags merged in, children kept in schema order.
pub(crate) fn formatted_properties(
    base: Option<&XmlElement>,
    format: &RunFormat,
) -> Option<XmlElement> {
    if format.is_plain() {
        return base.cloned();
    }
    let mut props = base
        .cloned()
        .unwrap_or_else(|| XmlElement::new(RUN_PROPERTIES));

    if format.bold {
        set_property(&mut props, XmlElement::new("w:b"));
    }
    if format.italic {
        set_property(&mut props, XmlElement::new("w:i"));
    }
    if format.strike {
        set_property(&mut props, XmlElement::new("w:strike"));
    }
    if let Some(color) = &format.color {
        set_property(&mut props, XmlElement::new("w:color").with_attr("w:val", color.as_str()));
    }
    if format.underline {
        set_property(&mut props, XmlElement::new("w:u").with_attr("w:val", "single"));
    }
    if let Some(fill) = &format.background {
        set_property(
            &mut props,
            XmlElement::new("w:shd")
                .with_attr("w:val", "clear")
                .with_attr("w:color", "auto")
                .with_attr("w:fill", fill.as_str()),
        );
    }

    props.children.sort_by_key(|child| match child {
        XmlNode::Element(e) => RUN_PROPERTY_ORDER
            .iter()
            .position(|name| e.is(name))
            .unwrap_or(RUN_PROPERTY_ORDER.len()),
        XmlNode::Text(_) => RUN_PROPERTY_ORDER.len(),
    });
    Some(props)
}

fn set_property(props: &mut XmlElement, property: XmlElement) {
    props
        .children
        .retain(|c| !matches!(c, XmlNode::Element(e) if e.name == property.name));
    props.children.push(XmlNode::Element(property));
}

//! HTML subset to formatted runs.
//!
//! Field values may carry a small amount of inline HTML from the editor.
//! [`parse`] flattens it into [`RichSegment`]s whose [`RunFormat`] is the
//! composition of every tag open around the text. Unknown tags are dropped
//! and their text kept.

use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::expect_used)]
static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?[A-Za-z][A-Za-z0-9]*(\s[^<>]*)?/?>").expect("tag pattern compiles")
});

#[allow(clippy::expect_used)]
static ATTR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z][A-Za-z0-9_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("attribute pattern compiles")
});

/// Character formatting of a run. Colors are upper-case `RRGGBB`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFormat {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strike: bool,
    pub color: Option<String>,
    pub background: Option<String>,
}

impl RunFormat {
    /// No formatting at all.
    #[must_use]
    pub fn is_plain(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RichSegment {
    Text { text: String, format: RunFormat },
    LineBreak,
}

/// Whether the value contains anything that looks like a tag.
#[must_use]
pub fn contains_html(value: &str) -> bool {
    TAG_PATTERN.is_match(value)
}

/// Parse an HTML fragment into formatted segments.
#[must_use]
pub fn parse(html: &str) -> Vec<RichSegment> {
    let mut builder = SegmentBuilder::default();
    let mut stack: Vec<(String, RunFormat)> = Vec::new();
    let mut rest = html;

    while !rest.is_empty() {
        let Some(found) = TAG_PATTERN.find(rest) else {
            builder.text(rest, current(&stack));
            break;
        };
        builder.text(&rest[..found.start()], current(&stack));
        let tag = found.as_str();
        rest = &rest[found.end()..];

        if let Some(name) = tag.strip_prefix("</") {
            let name = tag_name(name);
            if is_block(&name) {
                builder.block_end();
            }
            if let Some(pos) = stack.iter().rposition(|(open, _)| *open == name) {
                stack.truncate(pos);
            }
            continue;
        }

        let name = tag_name(&tag[1..]);
        let self_closing = tag.ends_with("/>");
        if name == "br" {
            builder.line_break();
            continue;
        }
        if is_block(&name) {
            builder.block_end();
        }
        if self_closing {
            continue;
        }
        let mut format = current(&stack).clone();
        apply_tag(&mut format, &name, tag);
        stack.push((name, format));
    }

    builder.finish()
}

fn current(stack: &[(String, RunFormat)]) -> &RunFormat {
    static PLAIN: RunFormat = RunFormat {
        bold: false,
        italic: false,
        underline: false,
        strike: false,
        color: None,
        background: None,
    };
    stack.last().map_or(&PLAIN, |(_, format)| format)
}

fn tag_name(tag: &str) -> String {
    tag.chars()
        .take_while(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase()
}

fn is_block(name: &str) -> bool {
    matches!(name, "p" | "div")
}

fn apply_tag(format: &mut RunFormat, name: &str, tag: &str) {
    match name {
        "b" | "strong" => format.bold = true,
        "i" | "em" => format.italic = true,
        "u" | "ins" => format.underline = true,
        "s" | "strike" | "del" => format.strike = true,
        "font" => {
            if let Some(color) = attribute(tag, "color").and_then(|c| parse_color(&c)) {
                format.color = Some(color);
            }
        }
        _ => {}
    }
    if let Some(style) = attribute(tag, "style") {
        apply_style(format, &style);
    }
}

fn apply_style(format: &mut RunFormat, style: &str) {
    for declaration in style.split(';') {
        let Some((property, value)) = declaration.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match property.trim().to_ascii_lowercase().as_str() {
            "color" => format.color = parse_color(value).or(format.color.take()),
            "background-color" | "background" => {
                format.background = parse_color(value).or(format.background.take());
            }
            "font-weight" => format.bold = matches!(value, "bold" | "bolder" | "600" | "700" | "800" | "900"),
            "font-style" => format.italic = value == "italic",
            "text-decoration" | "text-decoration-line" => {
                format.underline |= value.contains("underline");
                format.strike |= value.contains("line-through");
            }
            _ => {}
        }
    }
}

fn attribute(tag: &str, wanted: &str) -> Option<String> {
    ATTR_PATTERN.captures_iter(tag).find_map(|caps| {
        let name = caps.get(1)?;
        if !name.as_str().eq_ignore_ascii_case(wanted) {
            return None;
        }
        caps.get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|v| decode_entities(v.as_str()))
    })
}

/// Normalize a CSS color to `RRGGBB`.
#[must_use]
pub fn parse_color(value: &str) -> Option<String> {
    let value = value.trim().trim_end_matches("!important").trim();
    if let Some(hex) = value.strip_prefix('#') {
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        return match hex.len() {
            6 => Some(hex.to_ascii_uppercase()),
            3 => Some(
                hex.chars()
                    .flat_map(|c| [c, c])
                    .collect::<String>()
                    .to_ascii_uppercase(),
            ),
            _ => None,
        };
    }

    let lower = value.to_ascii_lowercase();
    if let Some(args) = lower
        .strip_prefix("rgb(")
        .and_then(|v| v.strip_suffix(')'))
    {
        let channels: Vec<u8> = args
            .split(',')
            .map(|c| c.trim().parse::<f64>().ok().map(|v| v.clamp(0.0, 255.0).round()))
            .collect::<Option<Vec<f64>>>()?
            .into_iter()
            .map(channel)
            .collect();
        return match channels.as_slice() {
            [r, g, b] => Some(format!("{r:02X}{g:02X}{b:02X}")),
            _ => None,
        };
    }

    named_color(&lower).map(str::to_owned)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn channel(value: f64) -> u8 {
    // Already clamped to 0..=255 and rounded.
    value as u8
}

fn named_color(name: &str) -> Option<&'static str> {
    Some(match name {
        "black" => "000000",
        "white" => "FFFFFF",
        "red" => "FF0000",
        "lime" => "00FF00",
        "green" => "008000",
        "blue" => "0000FF",
        "yellow" => "FFFF00",
        "cyan" | "aqua" => "00FFFF",
        "magenta" | "fuchsia" => "FF00FF",
        "silver" => "C0C0C0",
        "gray" | "grey" => "808080",
        "maroon" => "800000",
        "olive" => "808000",
        "purple" => "800080",
        "teal" => "008080",
        "navy" => "000080",
        "orange" => "FFA500",
        _ => return None,
    })
}

/// Decode the common named entities and numeric references. Anything
/// unrecognized stays as written.
#[must_use]
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_entity(&rest[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let number = name.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Accumulates segments, collapsing whitespace the way a browser would.
#[derive(Debug, Default)]
struct SegmentBuilder {
    segments: Vec<RichSegment>,
    pending_break: bool,
    /// Whether the last emitted character was collapsible space, or we
    /// are at the start of a line.
    at_space: bool,
}

impl SegmentBuilder {
    fn text(&mut self, raw: &str, format: &RunFormat) {
        if self.segments.is_empty() {
            self.at_space = true;
        }
        let mut collapsed = String::with_capacity(raw.len());
        for c in raw.chars() {
            if c.is_ascii_whitespace() {
                if !self.at_space {
                    collapsed.push(' ');
                    self.at_space = true;
                }
            } else {
                collapsed.push(c);
                self.at_space = false;
            }
        }
        if collapsed.is_empty() {
            return;
        }
        if self.pending_break {
            self.pending_break = false;
            self.segments.push(RichSegment::LineBreak);
        }

        let text = decode_entities(&collapsed);
        if let Some(RichSegment::Text {
            text: last,
            format: last_format,
        }) = self.segments.last_mut()
        {
            if last_format == format {
                last.push_str(&text);
                return;
            }
        }
        self.segments.push(RichSegment::Text {
            text,
            format: format.clone(),
        });
    }

    fn line_break(&mut self) {
        if self.pending_break {
            self.pending_break = false;
            self.segments.push(RichSegment::LineBreak);
        }
        self.trim_trailing_space();
        self.segments.push(RichSegment::LineBreak);
        self.at_space = true;
    }

    fn block_end(&mut self) {
        let has_text = self
            .segments
            .iter()
            .any(|s| matches!(s, RichSegment::Text { .. }));
        if has_text && !matches!(self.segments.last(), Some(RichSegment::LineBreak)) {
            self.trim_trailing_space();
            self.pending_break = true;
            self.at_space = true;
        }
    }

    fn trim_trailing_space(&mut self) {
        if let Some(RichSegment::Text { text, .. }) = self.segments.last_mut() {
            let trimmed = text.trim_end_matches(' ').len();
            text.truncate(trimmed);
            if text.is_empty() {
                self.segments.pop();
            }
        }
    }

    fn finish(mut self) -> Vec<RichSegment> {
        self.trim_trailing_space();
        self.segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(text: &str, format: RunFormat) -> RichSegment {
        RichSegment::Text {
            text: text.to_owned(),
            format,
        }
    }

    fn bold() -> RunFormat {
        RunFormat {
            bold: true,
            ..RunFormat::default()
        }
    }

    #[test]
    fn detects_tags_only() {
        assert!(contains_html("<b>x</b>"));
        assert!(contains_html("line<br/>next"));
        assert!(!contains_html("a < b and c > d"));
        assert!(!contains_html("plain"));
    }

    #[test]
    fn nested_formatting_composes() {
        let segments = parse(r#"<span style="color:#ff0000">red <b>bold <i>both</i></b></span> plain"#);
        let red = RunFormat {
            color: Some("FF0000".to_owned()),
            ..RunFormat::default()
        };
        let red_bold = RunFormat {
            bold: true,
            ..red.clone()
        };
        let red_bold_italic = RunFormat {
            italic: true,
            ..red_bold.clone()
        };
        assert_eq!(
            segments,
            vec![
                text("red ", red),
                text("bold ", red_bold),
                text("both", red_bold_italic),
                text(" plain", RunFormat::default()),
            ]
        );
    }

    #[test]
    fn unknown_tags_keep_their_text() {
        let segments = parse("<marquee>hi <b>there</b></marquee>");
        assert_eq!(
            segments,
            vec![text("hi ", RunFormat::default()), text("there", bold())]
        );
    }

    #[test]
    fn background_and_short_colors() {
        let segments = parse(r#"<span style="background-color: #0f0; color: rgb(0, 0, 255)">x</span>"#);
        assert_eq!(
            segments,
            vec![text(
                "x",
                RunFormat {
                    color: Some("0000FF".to_owned()),
                    background: Some("00FF00".to_owned()),
                    ..RunFormat::default()
                }
            )]
        );
        assert_eq!(parse_color("Navy").as_deref(), Some("000080"));
        assert_eq!(parse_color("#12345"), None);
        assert_eq!(parse_color("hotpink"), None);
    }

    #[test]
    fn strike_and_underline_tags() {
        let segments = parse("<u>a</u><del>b</del><s>c</s>");
        let under = RunFormat {
            underline: true,
            ..RunFormat::default()
        };
        let strike = RunFormat {
            strike: true,
            ..RunFormat::default()
        };
        assert_eq!(
            segments,
            vec![text("a", under), text("bc", strike)]
        );
    }

    #[test]
    fn breaks_and_blocks() {
        let segments = parse("<p>one</p><p>two<br>three</p>");
        let plain = RunFormat::default();
        assert_eq!(
            segments,
            vec![
                text("one", plain.clone()),
                RichSegment::LineBreak,
                text("two", plain.clone()),
                RichSegment::LineBreak,
                text("three", plain),
            ]
        );
    }

    #[test]
    fn whitespace_collapses_and_entities_decode() {
        let segments = parse("<b>  a \n\t b  </b>&amp; &lt;c&gt;&nbsp;&#65;&#x42;");
        assert_eq!(
            segments,
            vec![
                text("a b ", bold()),
                text("& <c>\u{a0}AB", RunFormat::default()),
            ]
        );
    }

    #[test]
    fn stray_close_tags_are_ignored() {
        let segments = parse("a</b>b");
        assert_eq!(segments, vec![text("ab", RunFormat::default())]);
    }
}

//! BBCode parser and exporter.
//!
//! Supported tags:
//!
//! | tag | effect |
//! |-----|--------|
//! | `[b]` `[i]` `[u]` `[s]` | bold, italic, underline, strike |
//! | `[font=Name]` `[size=N]` | font family and size in points |
//! | `[color=#rrggbb]` `[bgcolor=#rrggbb]` `[highlight=#rrggbb]` | colors |
//! | `[sub]` `[sup]` | vertical position |
//! | `[url]` `[url=target]` `[email]` `[email=address]` | links |
//! | `[img]src[/img]` `[img=WxH]src[/img]` | images |
//! | `[left]` `[center]` `[right]` | paragraph alignment |
//! | `[quote]` `[quote=author]` | quote environment |
//! | `[code]` `[code=syntax]` | code environment, body taken literally |
//! | `[list]` `[list=1]` `[list=a]` `[list=A]` `[*]` | list environment and list points |
//!
//! A line break right after an opening or closing environment tag is not part of the content.

use regex::Regex;
use richdoc_core::{
    Alignment, AttributeKey, DocumentError, EnvironmentKind, EnvironmentType, Fragment,
    FragmentBuilder, ListStyle, MarkupError, MarkupErrorKind, MarkupExporter, MarkupParser,
    ParagraphBody, ParagraphData, Rgb, SecImage, Section, TextAttributes, TextPosition,
    TextSyntax,
};
use std::fmt::Write;
use std::sync::Arc;

const TAG_PATTERN: &str = r"\[(/)?([A-Za-z]+|\*)(?:=([^\[\]]*))?\]";

/// BBCode to [`Fragment`] parser.
#[derive(Debug, Clone)]
pub struct BbcodeParser {
    tag: Regex,
    smileys: Vec<SecImage>,
}

impl BbcodeParser {
    /// Create a parser.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            tag: Regex::new(TAG_PATTERN)?,
            smileys: Vec::new(),
        })
    }

    /// Replace smiley codes (e.g. `:-)`) in text runs by the given smiley images.
    pub fn with_smileys(mut self, smileys: Vec<SecImage>) -> Self {
        self.smileys = smileys
            .into_iter()
            .filter(|s| s.smiley_code().is_some_and(|code| !code.is_empty()))
            .collect();
        // longest code first, so ":-))" wins over ":-)"
        self.smileys.sort_by_key(|s| {
            std::cmp::Reverse(s.smiley_code().map(str::len).unwrap_or_default())
        });
        self
    }
}

enum OpenKind {
    Style(TextAttributes),
    Alignment(Alignment),
    Environment,
}

struct OpenTag {
    name: String,
    position: usize,
    text: String,
    kind: OpenKind,
}

struct ParseState<'a> {
    builder: FragmentBuilder,
    base: &'a TextAttributes,
    smileys: &'a [SecImage],
    stack: Vec<OpenTag>,
    attributes: Arc<TextAttributes>,
}

fn nesting_error(err: DocumentError, position: usize, tag: &str) -> MarkupError {
    match err {
        DocumentError::Markup(err) => err,
        _ => MarkupError::new(MarkupErrorKind::IllegalNesting, position, tag),
    }
}

fn invalid(position: usize, tag: &str) -> MarkupError {
    MarkupError::new(MarkupErrorKind::InvalidArgument, position, tag)
}

/// Byte offset of the matching `[/name]` at or after `from`, and the offset right behind it.
///
/// `folded` is the ASCII-lowercased source, so its byte offsets match the original.
fn find_closing(folded: &str, from: usize, name: &str) -> Option<(usize, usize)> {
    let needle = format!("[/{name}]");
    let start = from + folded[from..].find(&needle)?;
    Some((start, start + needle.len()))
}

fn parse_size(arg: &str) -> Option<(u32, u32)> {
    let (w, h) = arg.split_once(['x', 'X'])?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

fn list_style(arg: Option<&str>) -> Option<ListStyle> {
    match arg {
        None | Some("") | Some("*") => Some(ListStyle::Bullet),
        Some("1") => Some(ListStyle::Decimal),
        Some("a") => Some(ListStyle::LowerAlpha),
        Some("A") => Some(ListStyle::UpperAlpha),
        _ => None,
    }
}

impl ParseState<'_> {
    fn refresh_attributes(&mut self) {
        let mut attributes = self.base.clone();
        for open in &self.stack {
            if let OpenKind::Style(patch) = &open.kind {
                attributes = attributes.merged(patch);
            }
        }
        self.attributes = Arc::new(attributes);
    }

    fn alignment(&self) -> Option<Alignment> {
        self.stack.iter().rev().find_map(|open| match open.kind {
            OpenKind::Alignment(alignment) => Some(alignment),
            _ => None,
        })
    }

    fn text(&mut self, text: &str) {
        let alignment = self.alignment();
        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                self.builder.new_line();
            }
            if let Some(alignment) = alignment {
                self.builder.set_alignment(alignment);
            }
            if !line.is_empty() {
                self.line(line);
            }
        }
    }

    fn line(&mut self, mut line: &str) {
        while !line.is_empty() {
            let next = self
                .smileys
                .iter()
                .filter_map(|s| {
                    let code = s.smiley_code()?;
                    line.find(code).map(|at| (at, code.len(), s))
                })
                .min_by_key(|(at, _, _)| *at);
            let Some((at, len, smiley)) = next else {
                self.builder.push_text(line, Arc::clone(&self.attributes));
                return;
            };
            if at > 0 {
                self.builder
                    .push_text(&line[..at], Arc::clone(&self.attributes));
            }
            if self.builder.push_image(smiley.clone()).is_err() {
                self.builder
                    .push_text(&line[at..at + len], Arc::clone(&self.attributes));
            }
            line = &line[at + len..];
        }
    }

    fn open_style(&mut self, name: &str, position: usize, tag: &str, patch: TextAttributes) {
        self.stack.push(OpenTag {
            name: name.to_string(),
            position,
            text: tag.to_string(),
            kind: OpenKind::Style(patch),
        });
        self.refresh_attributes();
    }

    fn open_environment(
        &mut self,
        name: &str,
        position: usize,
        tag: &str,
        kind: EnvironmentKind,
    ) -> Result<(), MarkupError> {
        self.builder
            .open_environment(kind)
            .map_err(|err| nesting_error(err, position, tag))?;
        self.stack.push(OpenTag {
            name: name.to_string(),
            position,
            text: tag.to_string(),
            kind: OpenKind::Environment,
        });
        Ok(())
    }

    fn close(&mut self, name: &str, position: usize, tag: &str) -> Result<(), MarkupError> {
        if name == "*" {
            return Ok(());
        }
        match self.stack.last() {
            Some(open) if open.name == name => {}
            _ => {
                return Err(MarkupError::new(
                    MarkupErrorKind::UnexpectedClosingTag,
                    position,
                    tag,
                ));
            }
        }
        let Some(open) = self.stack.pop() else {
            return Ok(());
        };
        match open.kind {
            OpenKind::Style(_) => self.refresh_attributes(),
            OpenKind::Alignment(_) => {}
            OpenKind::Environment => {
                self.builder.close_environment();
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<Fragment, MarkupError> {
        if let Some(open) = self.stack.last() {
            return Err(MarkupError::new(
                MarkupErrorKind::UnclosedTag,
                open.position,
                open.text.clone(),
            ));
        }
        Ok(self.builder.finish())
    }
}

impl MarkupParser for BbcodeParser {
    fn parse(&self, source: &str, base: &TextAttributes) -> Result<Fragment, MarkupError> {
        let mut state = ParseState {
            builder: FragmentBuilder::new(),
            base,
            smileys: &self.smileys,
            stack: Vec::new(),
            attributes: Arc::new(base.clone()),
        };
        let folded = source.to_ascii_lowercase();
        let mut cursor = 0;

        while let Some(caps) = self.tag.captures_at(source, cursor) {
            let Some(whole) = caps.get(0) else { break };
            state.text(&source[cursor..whole.start()]);
            cursor = whole.end();

            let position = whole.start();
            let tag = whole.as_str();
            let name = caps
                .get(2)
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();
            let arg = caps.get(3).map(|m| m.as_str().trim());

            if caps.get(1).is_some() {
                state.close(&name, position, tag)?;
                continue;
            }

            match name.as_str() {
                "b" => state.open_style(&name, position, tag, TextAttributes::new().with_bold(true)),
                "i" => state.open_style(&name, position, tag, TextAttributes::new().with_italic(true)),
                "u" => state.open_style(
                    &name,
                    position,
                    tag,
                    TextAttributes::new().with_underline(true),
                ),
                "s" => state.open_style(&name, position, tag, TextAttributes::new().with_strike(true)),
                "sub" | "sup" => {
                    let value = if name == "sub" {
                        TextPosition::Subscript
                    } else {
                        TextPosition::Superscript
                    };
                    state.open_style(&name, position, tag, TextAttributes::new().with_position(value));
                }
                "size" => {
                    let size = arg
                        .and_then(|a| a.parse::<u32>().ok())
                        .filter(|s| *s > 0)
                        .ok_or_else(|| invalid(position, tag))?;
                    state.open_style(&name, position, tag, TextAttributes::new().with_font_size(size));
                }
                "font" => {
                    let family = arg.filter(|a| !a.is_empty()).ok_or_else(|| invalid(position, tag))?;
                    state.open_style(
                        &name,
                        position,
                        tag,
                        TextAttributes::new().with_font_family(family),
                    );
                }
                "color" | "bgcolor" | "highlight" => {
                    let color = arg
                        .and_then(Rgb::from_hex)
                        .ok_or_else(|| invalid(position, tag))?;
                    let patch = match name.as_str() {
                        "color" => TextAttributes::new().with_foreground(color),
                        "bgcolor" => TextAttributes::new().with_background(color),
                        _ => TextAttributes::new().with_highlight(color),
                    };
                    state.open_style(&name, position, tag, patch);
                }
                "url" | "email" => {
                    let patch = |target: &str| {
                        if name == "url" {
                            TextAttributes::new().with_url(target)
                        } else {
                            TextAttributes::new().with_email(target)
                        }
                    };
                    match arg.filter(|a| !a.is_empty()) {
                        Some(target) => state.open_style(&name, position, tag, patch(target)),
                        None => {
                            let (end, after) = find_closing(&folded, cursor, &name).ok_or_else(|| {
                                MarkupError::new(MarkupErrorKind::UnclosedTag, position, tag)
                            })?;
                            let target = source[cursor..end].trim();
                            if target.is_empty() {
                                return Err(invalid(position, tag));
                            }
                            state.open_style(&name, position, tag, patch(target));
                            state.text(target);
                            state.close(&name, end, &source[end..after])?;
                            cursor = after;
                        }
                    }
                }
                "img" => {
                    let (end, after) = find_closing(&folded, cursor, "img").ok_or_else(|| {
                        MarkupError::new(MarkupErrorKind::UnclosedTag, position, tag)
                    })?;
                    let src = source[cursor..end].trim();
                    let (width, height) = match arg {
                        Some(arg) => parse_size(arg).ok_or_else(|| invalid(position, tag))?,
                        None => (0, 0),
                    };
                    if src.is_empty() {
                        return Err(invalid(position, tag));
                    }
                    state
                        .builder
                        .push_image(SecImage::new(src, width, height))
                        .map_err(|err| nesting_error(err, position, tag))?;
                    cursor = after;
                }
                "left" | "center" | "right" => {
                    let alignment = match name.as_str() {
                        "left" => Alignment::Left,
                        "center" => Alignment::Center,
                        _ => Alignment::Right,
                    };
                    state.builder.set_alignment(alignment);
                    state.stack.push(OpenTag {
                        name: name.clone(),
                        position,
                        text: tag.to_string(),
                        kind: OpenKind::Alignment(alignment),
                    });
                }
                "quote" => {
                    let author = arg.filter(|a| !a.is_empty()).map(str::to_string);
                    state.open_environment(&name, position, tag, EnvironmentKind::quote(author))?;
                }
                "list" => {
                    let style = list_style(arg).ok_or_else(|| invalid(position, tag))?;
                    state.open_environment(&name, position, tag, EnvironmentKind::list(style))?;
                }
                "*" => state.builder.list_item(),
                "code" => {
                    let syntax = arg.filter(|a| !a.is_empty()).map(str::to_string);
                    let (end, after) = find_closing(&folded, cursor, "code").ok_or_else(|| {
                        MarkupError::new(MarkupErrorKind::UnclosedTag, position, tag)
                    })?;
                    state.open_environment(&name, position, tag, EnvironmentKind::code(syntax))?;
                    let body = &source[cursor..end];
                    state.builder.push_text(body, Arc::clone(&state.attributes));
                    state.close(&name, end, &source[end..after])?;
                    cursor = after;
                }
                _ => {
                    return Err(MarkupError::new(MarkupErrorKind::UnknownTag, position, tag));
                }
            }
        }
        state.text(&source[cursor..]);
        let fragment = state.finish()?;
        tracing::trace!(len = fragment.len(), "parsed bbcode");
        Ok(fragment)
    }
}

/// [`Fragment`] to BBCode exporter.
#[derive(Debug, Clone, Copy, Default)]
pub struct BbcodeExporter;

impl MarkupExporter for BbcodeExporter {
    fn syntax(&self) -> TextSyntax {
        TextSyntax::Bbcode
    }

    fn export(&self, fragment: &Fragment) -> String {
        let mut out = String::new();
        write_paragraphs(fragment.paragraphs(), EnvironmentType::Root, &mut out);
        out
    }
}

fn alignment_tag(alignment: Alignment) -> Option<&'static str> {
    match alignment {
        Alignment::Undefined => None,
        Alignment::Left => Some("left"),
        Alignment::Center => Some("center"),
        Alignment::Right => Some("right"),
    }
}

fn write_paragraphs(paragraphs: &[ParagraphData], parent: EnvironmentType, out: &mut String) {
    for (i, paragraph) in paragraphs.iter().enumerate() {
        match &paragraph.body {
            ParagraphBody::Text(sections) => {
                if parent == EnvironmentType::Code {
                    for section in sections {
                        section.write_plain(out);
                    }
                    continue;
                }
                if paragraph.props.list_point {
                    out.push_str("[*]");
                }
                let align = alignment_tag(paragraph.props.alignment);
                if let Some(align) = align {
                    let _ = write!(out, "[{align}]");
                }
                let terminated = paragraph.is_terminated();
                let count = sections.len();
                for (j, section) in sections.iter().enumerate() {
                    write_section(section, terminated && j + 1 == count, out);
                }
                if let Some(align) = align {
                    let _ = write!(out, "[/{align}]");
                }
                if terminated {
                    out.push('\n');
                }
            }
            ParagraphBody::Environment(env) => {
                if i > 0 && paragraphs[i - 1].is_text() && !paragraphs[i - 1].is_terminated() {
                    out.push('\n');
                }
                if paragraph.props.list_point {
                    out.push_str("[*]");
                }
                let (name, arg) = match &env.kind {
                    EnvironmentKind::Quote { author } => ("quote", author.clone()),
                    EnvironmentKind::Code { syntax } => ("code", syntax.clone()),
                    EnvironmentKind::List { style } => (
                        "list",
                        match style {
                            ListStyle::Bullet => None,
                            ListStyle::Decimal => Some("1".to_string()),
                            ListStyle::LowerAlpha => Some("a".to_string()),
                            ListStyle::UpperAlpha => Some("A".to_string()),
                        },
                    ),
                    EnvironmentKind::Root => ("quote", None),
                };
                match arg {
                    Some(arg) => {
                        let _ = write!(out, "[{name}={arg}]\n");
                    }
                    None => {
                        let _ = write!(out, "[{name}]\n");
                    }
                }
                write_paragraphs(&env.paragraphs, env.kind.env_type(), out);
                let _ = write!(out, "\n[/{name}]");
                if i + 1 < paragraphs.len() {
                    out.push('\n');
                }
            }
        }
    }
}

const TAG_ORDER: [(AttributeKey, &str); 4] = [
    (AttributeKey::Bold, "b"),
    (AttributeKey::Italic, "i"),
    (AttributeKey::Underline, "u"),
    (AttributeKey::Strike, "s"),
];

fn write_section(section: &Section, strip_newline: bool, out: &mut String) {
    let text = match section {
        Section::Image(image) => {
            let image = &image.image;
            if let Some(code) = image.smiley_code() {
                out.push_str(code);
            } else if image.width() > 0 && image.height() > 0 {
                let _ = write!(
                    out,
                    "[img={}x{}]{}[/img]",
                    image.width(),
                    image.height(),
                    image.source()
                );
            } else {
                let _ = write!(out, "[img]{}[/img]", image.source());
            }
            return;
        }
        Section::Text(text) => text,
    };
    let mut body = text.text.to_string();
    if strip_newline && body.ends_with('\n') {
        body.pop();
    }
    if body.is_empty() {
        return;
    }

    let attrs = &text.attributes;
    let mut closing: Vec<&str> = Vec::new();
    let mut open = |out: &mut String, tag: String, name: &'static str| {
        out.push_str(&tag);
        closing.push(name);
    };
    if let Some(url) = attrs.url() {
        open(out, format!("[url={url}]"), "url");
    }
    if let Some(email) = attrs.email() {
        open(out, format!("[email={email}]"), "email");
    }
    for (key, name) in TAG_ORDER {
        if matches!(attrs.get(key), Some(richdoc_core::AttributeValue::Flag(true))) {
            open(out, format!("[{name}]"), name);
        }
    }
    if let Some(family) = attrs.font_family() {
        open(out, format!("[font={family}]"), "font");
    }
    if let Some(size) = attrs.font_size() {
        open(out, format!("[size={size}]"), "size");
    }
    if let Some(color) = attrs.foreground() {
        open(out, format!("[color={color}]"), "color");
    }
    if let Some(color) = attrs.background() {
        open(out, format!("[bgcolor={color}]"), "bgcolor");
    }
    if let Some(color) = attrs.highlight() {
        open(out, format!("[highlight={color}]"), "highlight");
    }
    match attrs.position() {
        Some(TextPosition::Subscript) => open(out, "[sub]".to_string(), "sub"),
        Some(TextPosition::Superscript) => open(out, "[sup]".to_string(), "sup"),
        _ => {}
    }
    out.push_str(&body);
    for name in closing.iter().rev() {
        let _ = write!(out, "[/{name}]");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Result<Fragment, MarkupError> {
        BbcodeParser::new().unwrap().parse(source, &TextAttributes::new())
    }

    #[test]
    fn test_nested_styles_merge() {
        let fragment = parse("a[b]b[i]c[/i][/b]").unwrap();
        let sections = fragment.paragraphs()[0].sections().unwrap();
        assert_eq!(sections.len(), 3);
        let last = sections[2].attributes().unwrap();
        assert_eq!(last.bold(), Some(true));
        assert_eq!(last.italic(), Some(true));
    }

    #[test]
    fn test_errors_carry_position() {
        let err = parse("ab[b]c").unwrap_err();
        assert_eq!(err.kind, MarkupErrorKind::UnclosedTag);
        assert_eq!(err.position, 2);

        let err = parse("[b]x[/i]").unwrap_err();
        assert_eq!(err.kind, MarkupErrorKind::UnexpectedClosingTag);
        assert_eq!(err.fragment, "[/i]");

        let err = parse("[blink]x[/blink]").unwrap_err();
        assert_eq!(err.kind, MarkupErrorKind::UnknownTag);

        let err = parse("[color=purple]x[/color]").unwrap_err();
        assert_eq!(err.kind, MarkupErrorKind::InvalidArgument);
    }

    #[test]
    fn test_code_body_is_literal() {
        let fragment = parse("[code=rust]\nlet v = [b]x[/b];\n[/code]").unwrap();
        let env = fragment.paragraphs()[0].environment_data().unwrap();
        assert_eq!(env.kind, EnvironmentKind::code(Some("rust".to_string())));
        assert_eq!(fragment.plain_text(), "\nlet v = [b]x[/b];\n");
    }

    #[test]
    fn test_tags_inside_code_stay_text() {
        let fragment = parse("[code][img]a.png[/img][/code]").unwrap();
        assert_eq!(fragment.plain_text(), "\n[img]a.png[/img]\n");
    }

    #[test]
    fn test_closing_tags_match_any_case() {
        let fragment = parse("[CODE]x[/Code]").unwrap();
        assert_eq!(fragment.plain_text(), "\nx\n");

        let fragment = parse("[url]a.html[/URL]").unwrap();
        let sections = fragment.paragraphs()[0].sections().unwrap();
        assert_eq!(sections[0].attributes().unwrap().url(), Some("a.html"));
    }

    #[test]
    fn test_many_code_blocks() {
        let source = "[code]x[/code]".repeat(2000);
        let fragment = parse(&source).unwrap();
        assert_eq!(fragment.plain_text().matches('x').count(), 2000);
    }

    #[test]
    fn test_smileys_become_images() {
        let parser = BbcodeParser::new()
            .unwrap()
            .with_smileys(vec![SecImage::smiley(":-)", "smile.png", 16, 16)]);
        let fragment = parser.parse("hi :-) there", &TextAttributes::new()).unwrap();
        assert_eq!(fragment.len(), 3 + 1 + 6);
        assert_eq!(BbcodeExporter.export(&fragment), "hi :-) there");
    }
}

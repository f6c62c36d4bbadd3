//! HTML exporter.

use richdoc_core::{
    Alignment, EnvironmentKind, EnvironmentType, Fragment, ListStyle, MarkupExporter,
    ParagraphBody, ParagraphData, Section, TextPosition, TextSyntax,
};
use std::fmt::Write;

/// [`Fragment`] to HTML exporter. Produces a body fragment, not a full document.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlExporter;

impl MarkupExporter for HtmlExporter {
    fn syntax(&self) -> TextSyntax {
        TextSyntax::Html
    }

    fn export(&self, fragment: &Fragment) -> String {
        let mut out = String::new();
        write_paragraphs(fragment.paragraphs(), EnvironmentType::Root, &mut out);
        out
    }
}

/// Escape `&`, `<`, `>` and `"`.
pub fn escape(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

fn write_paragraphs(paragraphs: &[ParagraphData], parent: EnvironmentType, out: &mut String) {
    for paragraph in paragraphs {
        let item = parent == EnvironmentType::List && paragraph.props.list_point;
        match &paragraph.body {
            ParagraphBody::Text(sections) if parent == EnvironmentType::Code => {
                for section in sections {
                    let mut plain = String::new();
                    section.write_plain(&mut plain);
                    escape(&plain, out);
                }
            }
            ParagraphBody::Text(sections) => {
                let tag = if item { "li" } else { "p" };
                out.push('<');
                out.push_str(tag);
                match paragraph.props.alignment {
                    Alignment::Undefined => {}
                    Alignment::Left => out.push_str(" style=\"text-align:left\""),
                    Alignment::Center => out.push_str(" style=\"text-align:center\""),
                    Alignment::Right => out.push_str(" style=\"text-align:right\""),
                }
                out.push('>');
                for section in sections {
                    write_section(section, out);
                }
                let _ = writeln!(out, "</{tag}>");
            }
            ParagraphBody::Environment(env) => {
                if item {
                    out.push_str("<li>");
                }
                let close = match &env.kind {
                    EnvironmentKind::Quote { author } => {
                        match author {
                            Some(author) => {
                                out.push_str("<blockquote data-author=\"");
                                escape(author, out);
                                out.push_str("\">\n");
                            }
                            None => out.push_str("<blockquote>\n"),
                        }
                        "</blockquote>"
                    }
                    EnvironmentKind::Code { syntax } => {
                        match syntax {
                            Some(syntax) => {
                                out.push_str("<pre><code class=\"language-");
                                escape(syntax, out);
                                out.push_str("\">");
                            }
                            None => out.push_str("<pre><code>"),
                        }
                        "</code></pre>"
                    }
                    EnvironmentKind::List { style } => match style {
                        ListStyle::Bullet => {
                            out.push_str("<ul>\n");
                            "</ul>"
                        }
                        ListStyle::Decimal => {
                            out.push_str("<ol>\n");
                            "</ol>"
                        }
                        ListStyle::LowerAlpha => {
                            out.push_str("<ol type=\"a\">\n");
                            "</ol>"
                        }
                        ListStyle::UpperAlpha => {
                            out.push_str("<ol type=\"A\">\n");
                            "</ol>"
                        }
                    },
                    EnvironmentKind::Root => {
                        out.push_str("<div>\n");
                        "</div>"
                    }
                };
                write_paragraphs(&env.paragraphs, env.kind.env_type(), out);
                out.push_str(close);
                if item {
                    out.push_str("</li>");
                }
                out.push('\n');
            }
        }
    }
}

fn write_section(section: &Section, out: &mut String) {
    let text = match section {
        Section::Image(image) => {
            let image = &image.image;
            out.push_str("<img src=\"");
            escape(image.source(), out);
            out.push('"');
            if image.width() > 0 && image.height() > 0 {
                let _ = write!(out, " width=\"{}\" height=\"{}\"", image.width(), image.height());
            }
            if let Some(code) = image.smiley_code() {
                out.push_str(" alt=\"");
                escape(code, out);
                out.push('"');
            }
            out.push_str(">");
            return;
        }
        Section::Text(text) => text,
    };
    let body = text.text.to_string();
    let body = body.strip_suffix('\n').unwrap_or(&body);
    if body.is_empty() {
        return;
    }

    let attrs = &text.attributes;
    let mut closing = Vec::new();
    if let Some(url) = attrs.url() {
        out.push_str("<a href=\"");
        escape(url, out);
        out.push_str("\">");
        closing.push("</a>");
    } else if let Some(email) = attrs.email() {
        out.push_str("<a href=\"mailto:");
        escape(email, out);
        out.push_str("\">");
        closing.push("</a>");
    }
    for (set, open, close) in [
        (attrs.bold(), "<b>", "</b>"),
        (attrs.italic(), "<i>", "</i>"),
        (attrs.underline(), "<u>", "</u>"),
        (attrs.strike(), "<s>", "</s>"),
    ] {
        if set == Some(true) {
            out.push_str(open);
            closing.push(close);
        }
    }

    let mut style = String::new();
    if let Some(family) = attrs.font_family() {
        let _ = write!(style, "font-family:{family};");
    }
    if let Some(size) = attrs.font_size() {
        let _ = write!(style, "font-size:{size}pt;");
    }
    if let Some(color) = attrs.foreground() {
        let _ = write!(style, "color:{color};");
    }
    if let Some(color) = attrs.background() {
        let _ = write!(style, "background-color:{color};");
    }
    if !style.is_empty() {
        out.push_str("<span style=\"");
        escape(&style, out);
        out.push_str("\">");
        closing.push("</span>");
    }
    if let Some(color) = attrs.highlight() {
        let _ = write!(out, "<mark style=\"background-color:{color}\">");
        closing.push("</mark>");
    }
    match attrs.position() {
        Some(TextPosition::Subscript) => {
            out.push_str("<sub>");
            closing.push("</sub>");
        }
        Some(TextPosition::Superscript) => {
            out.push_str("<sup>");
            closing.push("</sup>");
        }
        _ => {}
    }

    escape(body, out);
    for close in closing.iter().rev() {
        out.push_str(close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use richdoc_core::{EnvironmentData, SecImage, TextAttributes};
    use std::sync::Arc;

    #[test]
    fn test_escapes_text() {
        let fragment = Fragment::from_text("a<b & \"c\"", Arc::new(TextAttributes::new()));
        assert_eq!(HtmlExporter.export(&fragment), "<p>a&lt;b &amp; &quot;c&quot;</p>\n");
    }

    #[test]
    fn test_list_points_become_items() {
        let mut item = ParagraphData::text(vec![Section::text("one", Arc::new(TextAttributes::new()))]);
        item.props.list_point = true;
        let list = EnvironmentData::with_content(
            EnvironmentKind::list(ListStyle::Decimal),
            Fragment::new(vec![item]),
        );
        let fragment = Fragment::environment(list, Default::default());
        assert_eq!(HtmlExporter.export(&fragment), "<ol>\n<li>one</li>\n</ol>\n");
    }

    #[test]
    fn test_image_attributes() {
        let fragment = Fragment::image(SecImage::new("a&b.png", 4, 3));
        assert_eq!(
            HtmlExporter.export(&fragment),
            "<p><img src=\"a&amp;b.png\" width=\"4\" height=\"3\"></p>\n"
        );
    }
}

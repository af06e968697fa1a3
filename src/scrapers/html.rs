//! Small helpers over `scraper` shared by the page parsers.

use scraper::{ElementRef, Html, Node, Selector};

const BLOCK_ELEMENTS: [&str; 22] = [
    "address",
    "article",
    "aside",
    "blockquote",
    "dd",
    "div",
    "dl",
    "dt",
    "footer",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "header",
    "li",
    "ol",
    "p",
    "pre",
    "section",
    "tr",
];
const SKIPPED_ELEMENTS: [&str; 5] = ["script", "style", "noscript", "template", "svg"];

/// Parses a selector known at compile time.
pub fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid CSS selector")
}

pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visible text of `element` with whitespace collapsed.
pub fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

/// Text of the first element matching `css` anywhere in `document`.
pub fn first_text(document: &Html, css: &str) -> Option<String> {
    document
        .select(&selector(css))
        .map(element_text)
        .find(|text| !text.is_empty())
}

/// Text of the first element matching `css` below `element`.
pub fn first_text_in(element: ElementRef<'_>, css: &str) -> Option<String> {
    element
        .select(&selector(css))
        .map(element_text)
        .find(|text| !text.is_empty())
}

/// Non-empty `attribute` of the first element matching `css`.
pub fn first_attr(document: &Html, css: &str, attribute: &str) -> Option<String> {
    document
        .select(&selector(css))
        .filter_map(|element| element.value().attr(attribute))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Resolves `href` against `base`, leaving absolute and `data:` URLs untouched.
pub fn absolute_url(base: &str, href: &str) -> String {
    let trimmed = href.trim();
    if trimmed.starts_with("http://")
        || trimmed.starts_with("https://")
        || trimmed.starts_with("data:")
    {
        return trimmed.to_string();
    }
    url::Url::parse(base)
        .and_then(|base_url| base_url.join(trimmed))
        .map(|joined| joined.to_string())
        .unwrap_or_else(|_| trimmed.to_string())
}

fn flush_line(current: &mut String, lines: &mut Vec<String>) {
    let line = collapse_whitespace(current);
    if !line.is_empty() {
        lines.push(line);
    }
    current.clear();
}

fn collect_text_lines(element: ElementRef<'_>, current: &mut String, lines: &mut Vec<String>) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let mut pieces = text.split('\n');
                if let Some(first) = pieces.next() {
                    current.push_str(first);
                }
                for piece in pieces {
                    flush_line(current, lines);
                    current.push_str(piece);
                }
            }
            Node::Element(data) => {
                let name = data.name();
                if SKIPPED_ELEMENTS.contains(&name) {
                    continue;
                }
                let is_block = BLOCK_ELEMENTS.contains(&name);
                if is_block || name == "br" {
                    flush_line(current, lines);
                }
                if name == "td" || name == "th" {
                    current.push(' ');
                }
                if let Some(child_element) = ElementRef::wrap(child) {
                    collect_text_lines(child_element, current, lines);
                }
                if is_block {
                    flush_line(current, lines);
                }
            }
            _ => {}
        }
    }
}

/// Visible text of `element` split into lines at block boundaries and line breaks.
pub fn text_lines(element: ElementRef<'_>) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    collect_text_lines(element, &mut current, &mut lines);
    flush_line(&mut current, &mut lines);
    lines
}

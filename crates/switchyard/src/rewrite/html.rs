//! HTML flavour of the markup view.
//!
//! HTML is parsed with the lenient html5ever tree builder and copied into the
//! same tree type XML bodies use, so markup stages and XPath work on both.
//! Serialization follows HTML rules: no XML declaration, void elements
//! without end tags, raw text elements written verbatim.

use scraper::node::{Doctype, Node};
use scraper::{ElementRef, Html};
use sxd_document::dom::{ChildOfElement, ChildOfRoot, Document, Element};
use sxd_document::Package;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "plaintext",
];

/// Parse an HTML document. Never fails; malformed input is repaired the way
/// browsers repair it. Returns the tree and the doctype line, if any.
pub fn parse(text: &str) -> (Package, Option<String>) {
    let html = Html::parse_document(text);
    let package = Package::new();
    let mut doctype = None;
    {
        let document = package.as_document();
        for child in html.tree.root().children() {
            match child.value() {
                Node::Doctype(d) => doctype = Some(doctype_line(d)),
                Node::Comment(comment) => {
                    document.root().append_child(document.create_comment(&**comment));
                }
                Node::Element(_) => {
                    if let Some(source) = ElementRef::wrap(child) {
                        let element = copy_element(&document, source);
                        document.root().append_child(element);
                        copy_children(&document, element, source);
                    }
                }
                _ => {}
            }
        }
    }
    (package, doctype)
}

fn doctype_line(doctype: &Doctype) -> String {
    let mut line = format!("<!DOCTYPE {}", doctype.name());
    let public_id = doctype.public_id();
    let system_id = doctype.system_id();
    if !public_id.is_empty() {
        line.push_str(&format!(" PUBLIC \"{public_id}\""));
        if !system_id.is_empty() {
            line.push_str(&format!(" \"{system_id}\""));
        }
    } else if !system_id.is_empty() {
        line.push_str(&format!(" SYSTEM \"{system_id}\""));
    }
    line.push('>');
    line
}

fn copy_element<'d>(document: &Document<'d>, source: ElementRef<'_>) -> Element<'d> {
    let value = source.value();
    let element = document.create_element(value.name());
    for (name, attr) in value.attrs() {
        element.set_attribute_value(name, attr);
    }
    element
}

fn copy_children<'d>(document: &Document<'d>, parent: Element<'d>, source: ElementRef<'_>) {
    for child in source.children() {
        match child.value() {
            Node::Element(_) => {
                if let Some(source) = ElementRef::wrap(child) {
                    let element = copy_element(document, source);
                    parent.append_child(element);
                    copy_children(document, element, source);
                }
            }
            Node::Text(text) => {
                parent.append_child(document.create_text(&**text));
            }
            Node::Comment(comment) => {
                parent.append_child(document.create_comment(&**comment));
            }
            _ => {}
        }
    }
}

/// Serialize a tree built by [`parse`] back to HTML text.
pub fn serialize(document: &Document<'_>, doctype: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(doctype) = doctype {
        out.push_str(doctype);
    }
    for child in document.root().children() {
        match child {
            ChildOfRoot::Element(element) => write_element(&mut out, element),
            ChildOfRoot::Comment(comment) => write_comment(&mut out, comment.text()),
            ChildOfRoot::ProcessingInstruction(_) => {}
        }
    }
    out
}

fn write_element(out: &mut String, element: Element<'_>) {
    let name = element.name().local_part();
    out.push('<');
    out.push_str(name);
    for attribute in element.attributes() {
        out.push(' ');
        out.push_str(attribute.name().local_part());
        out.push_str("=\"");
        escape_attribute(out, attribute.value());
        out.push('"');
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&name) {
        return;
    }

    let raw = RAW_TEXT_ELEMENTS.contains(&name);
    for child in element.children() {
        match child {
            ChildOfElement::Element(child) => write_element(out, child),
            ChildOfElement::Text(text) if raw => out.push_str(text.text()),
            ChildOfElement::Text(text) => escape_text(out, text.text()),
            ChildOfElement::Comment(comment) => write_comment(out, comment.text()),
            ChildOfElement::ProcessingInstruction(_) => {}
        }
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn write_comment(out: &mut String, text: &str) {
    out.push_str("<!--");
    out.push_str(text);
    out.push_str("-->");
}

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

fn escape_attribute(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

//! Response body with a text view and a lazily parsed markup tree view.

use super::html;
use anyhow::{anyhow, Result};
use hyper::body::Bytes;
use sxd_document::dom::Document;
use sxd_document::{parser, writer, Package};

/// How a markup body is parsed and written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkupKind {
    /// Lenient HTML parsing, HTML serialization
    Html,
    /// Well-formed XML (including XHTML)
    Xml,
}

enum Tree {
    Xml(Package),
    Html {
        package: Package,
        doctype: Option<String>,
    },
}

impl Tree {
    fn package(&self) -> &Package {
        match self {
            Tree::Xml(package) | Tree::Html { package, .. } => package,
        }
    }
}

/// Body handed through the response chain.
///
/// Text stages read and replace raw text. Markup stages get a parsed tree,
/// built the first time one asks for it and serialized back only when a later
/// stage (or the final response) needs bytes again.
pub struct RewritableBody {
    raw: Bytes,
    tree: Option<Tree>,
}

impl RewritableBody {
    pub fn new(raw: Bytes) -> Self {
        Self { raw, tree: None }
    }

    pub fn is_parsed(&self) -> bool {
        self.tree.is_some()
    }

    /// Current body as text, or `None` when it is not UTF-8.
    pub fn text(&mut self) -> Result<Option<&str>> {
        self.flush_tree()?;
        Ok(std::str::from_utf8(&self.raw).ok())
    }

    /// Replace the body with new text, discarding any parsed tree.
    pub fn replace_text(&mut self, text: String) {
        self.tree = None;
        self.raw = Bytes::from(text);
    }

    /// Run `f` against the parsed document, parsing on first use.
    ///
    /// Returns `Ok(None)` when the body is not UTF-8. XML that is not well
    /// formed is an error; HTML is always repaired.
    pub fn with_document<R>(
        &mut self,
        kind: MarkupKind,
        f: impl FnOnce(&Document<'_>) -> R,
    ) -> Result<Option<R>> {
        if self.tree.is_none() {
            let Ok(text) = std::str::from_utf8(&self.raw) else {
                return Ok(None);
            };
            let tree = match kind {
                MarkupKind::Xml => Tree::Xml(
                    parser::parse(text).map_err(|e| anyhow!("markup parse failed: {e:?}"))?,
                ),
                MarkupKind::Html => {
                    let (package, doctype) = html::parse(text);
                    Tree::Html { package, doctype }
                }
            };
            self.tree = Some(tree);
        }
        match self.tree.as_ref() {
            Some(tree) => {
                let document = tree.package().as_document();
                Ok(Some(f(&document)))
            }
            None => Ok(None),
        }
    }

    /// Final bytes of the body.
    pub fn into_bytes(mut self) -> Result<Bytes> {
        self.flush_tree()?;
        Ok(self.raw)
    }

    fn flush_tree(&mut self) -> Result<()> {
        match self.tree.take() {
            Some(Tree::Xml(package)) => {
                let mut out = Vec::with_capacity(self.raw.len());
                writer::format_document(&package.as_document(), &mut out)
                    .map_err(|e| anyhow!("markup serialization failed: {e}"))?;
                self.raw = Bytes::from(out);
            }
            Some(Tree::Html { package, doctype }) => {
                let out = html::serialize(&package.as_document(), doctype.as_deref());
                self.raw = Bytes::from(out);
            }
            None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_view() {
        let mut body = RewritableBody::new(Bytes::from("ERLANG"));
        assert_eq!(body.text().unwrap(), Some("ERLANG"));
        body.replace_text("erlang".to_string());
        assert_eq!(body.into_bytes().unwrap(), Bytes::from("erlang"));
    }

    #[test]
    fn test_non_utf8_has_no_text() {
        let mut body = RewritableBody::new(Bytes::from_static(&[0xff, 0xfe, 0x00]));
        assert_eq!(body.text().unwrap(), None);
        assert_eq!(
            body.into_bytes().unwrap(),
            Bytes::from_static(&[0xff, 0xfe, 0x00])
        );
    }

    #[test]
    fn test_tree_is_parsed_lazily_and_reserialized() {
        let mut body = RewritableBody::new(Bytes::from("<html><title>Old</title></html>"));
        assert!(!body.is_parsed());

        body.with_document(MarkupKind::Xml, |doc| {
            let root = doc.root().children()[0].element().unwrap();
            let title = root.children()[0].element().unwrap();
            title.set_text("New");
        })
        .unwrap()
        .unwrap();
        assert!(body.is_parsed());

        let text = body.text().unwrap().unwrap().to_string();
        assert!(text.contains("<title>New</title>"), "got {text}");
        assert!(!body.is_parsed());
    }

    #[test]
    fn test_malformed_markup_is_an_error() {
        let mut body = RewritableBody::new(Bytes::from("<html><p>unclosed</html>"));
        assert!(body.with_document(MarkupKind::Xml, |_| ()).is_err());
    }

    #[test]
    fn test_html_is_repaired_and_written_as_html() {
        let mut body = RewritableBody::new(Bytes::from(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Old</title></head>\
             <body><p>one<br>two</body></html>",
        ));
        body.with_document(MarkupKind::Html, |doc| {
            let value = sxd_xpath::evaluate_xpath(doc, "//title").unwrap();
            if let sxd_xpath::Value::Nodeset(nodes) = value {
                for node in nodes.iter() {
                    if let sxd_xpath::nodeset::Node::Element(title) = node {
                        title.set_text("New");
                    }
                }
            }
        })
        .unwrap()
        .unwrap();

        let out = String::from_utf8(body.into_bytes().unwrap().to_vec()).unwrap();
        assert_eq!(
            out,
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>New</title></head>\
             <body><p>one<br>two</p></body></html>"
        );
    }

    #[test]
    fn test_non_utf8_has_no_document() {
        let mut body = RewritableBody::new(Bytes::from_static(&[0xff, 0xfe]));
        assert!(body
            .with_document(MarkupKind::Html, |_| ())
            .unwrap()
            .is_none());
        assert!(!body.is_parsed());
    }

    #[test]
    fn test_untouched_body_keeps_original_bytes() {
        let body = RewritableBody::new(Bytes::from("<a>1</a>"));
        assert_eq!(body.into_bytes().unwrap(), Bytes::from("<a>1</a>"));
    }
}

//! Declarative rewriters loaded from configuration.

use super::chain::{
    RequestRewriterChain, ResponseBodyTransformer, ResponseHead, ResponseRewriterChain,
    ResponseStage,
};
use super::descriptor::OutboundRequest;
use super::script::ScriptRewriter;
use anyhow::{anyhow, Result};
use hyper::header::{HeaderName, HeaderValue, LOCATION};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sxd_document::dom::Document;
use sxd_xpath::nodeset::Node;
use sxd_xpath::Value;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestRewriterConfig {
    SetHeader { name: String, value: String },
    RemoveHeader { name: String },
    /// Regex replacement over the outbound path
    RewritePath { pattern: String, replacement: String },
}

impl RequestRewriterConfig {
    fn kind(&self) -> &'static str {
        match self {
            RequestRewriterConfig::SetHeader { .. } => "set_header",
            RequestRewriterConfig::RemoveHeader { .. } => "remove_header",
            RequestRewriterConfig::RewritePath { .. } => "rewrite_path",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseRewriterConfig {
    SetHeader {
        name: String,
        value: String,
    },
    RemoveHeader {
        name: String,
    },
    /// Regex replacement over the body text
    Replace {
        pattern: String,
        replacement: String,
        /// Restrict to these media types; empty means any text body
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        content_types: Vec<String>,
    },
    Lowercase,
    /// Rewrite a `Location` header that starts with `from`
    RewriteLocation {
        from: String,
        to: String,
    },
    /// Set the text of every node an XPath expression selects
    XpathText {
        xpath: String,
        value: String,
    },
    Script {
        code: String,
    },
}

impl ResponseRewriterConfig {
    fn kind(&self) -> &'static str {
        match self {
            ResponseRewriterConfig::SetHeader { .. } => "set_header",
            ResponseRewriterConfig::RemoveHeader { .. } => "remove_header",
            ResponseRewriterConfig::Replace { .. } => "replace",
            ResponseRewriterConfig::Lowercase => "lowercase",
            ResponseRewriterConfig::RewriteLocation { .. } => "rewrite_location",
            ResponseRewriterConfig::XpathText { .. } => "xpath_text",
            ResponseRewriterConfig::Script { .. } => "script",
        }
    }
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| anyhow!("invalid header name '{name}'"))
}

fn compile_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| anyhow!("invalid pattern '{pattern}': {e}"))
}

pub fn build_request_chain(configs: &[RequestRewriterConfig]) -> Result<RequestRewriterChain> {
    let mut chain = RequestRewriterChain::new();
    for (index, config) in configs.iter().enumerate() {
        let name = format!("{}#{index}", config.kind());
        chain = match config.clone() {
            RequestRewriterConfig::SetHeader { name: header, value } => {
                header_name(&header)?;
                HeaderValue::from_str(&value)
                    .map_err(|_| anyhow!("invalid value for header '{header}'"))?;
                chain.rewrite(name, move |req: &mut OutboundRequest| {
                    req.set_header(&header, value.clone());
                    Ok(())
                })
            }
            RequestRewriterConfig::RemoveHeader { name: header } => {
                header_name(&header)?;
                chain.rewrite(name, move |req: &mut OutboundRequest| {
                    req.remove_header(&header);
                    Ok(())
                })
            }
            RequestRewriterConfig::RewritePath {
                pattern,
                replacement,
            } => {
                let regex = compile_regex(&pattern)?;
                chain.rewrite(name, move |req: &mut OutboundRequest| {
                    req.path = regex.replace_all(&req.path, replacement.as_str()).into_owned();
                    Ok(())
                })
            }
        };
    }
    Ok(chain)
}

pub fn build_response_chain(configs: &[ResponseRewriterConfig]) -> Result<ResponseRewriterChain> {
    let mut chain = ResponseRewriterChain::new();
    for (index, config) in configs.iter().enumerate() {
        let name = format!("{}#{index}", config.kind());
        chain = match config.clone() {
            ResponseRewriterConfig::SetHeader { name: header, value } => {
                header_name(&header)?;
                HeaderValue::from_str(&value)
                    .map_err(|_| anyhow!("invalid value for header '{header}'"))?;
                chain.observe(name, move |head: &mut ResponseHead| {
                    head.set_header(&header, &value)
                })
            }
            ResponseRewriterConfig::RemoveHeader { name: header } => {
                header_name(&header)?;
                chain.observe(name, move |head: &mut ResponseHead| {
                    head.remove_header(&header);
                    Ok(())
                })
            }
            ResponseRewriterConfig::Replace {
                pattern,
                replacement,
                content_types,
            } => {
                let replace = ReplaceText {
                    regex: compile_regex(&pattern)?,
                    replacement,
                    content_types: content_types
                        .iter()
                        .map(|ct| ct.to_ascii_lowercase())
                        .collect(),
                };
                chain.push(name, ResponseStage::Text(Arc::new(replace)))
            }
            ResponseRewriterConfig::Lowercase => {
                chain.transform_text(name, |_head: &mut ResponseHead, body: &str| {
                    Ok(Some(body.to_lowercase()))
                })
            }
            ResponseRewriterConfig::RewriteLocation { from, to } => {
                chain.observe(name, move |head: &mut ResponseHead| {
                    let rewritten = head
                        .headers
                        .get(LOCATION)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|location| location.strip_prefix(from.as_str()))
                        .map(|rest| format!("{to}{rest}"));
                    if let Some(location) = rewritten {
                        head.set_header(LOCATION.as_str(), &location)?;
                    }
                    Ok(())
                })
            }
            ResponseRewriterConfig::XpathText { xpath, value } => {
                check_xpath(&xpath)?;
                chain.transform_markup(name, move |_head: &mut ResponseHead, doc: &Document<'_>| {
                    set_xpath_text(doc, &xpath, &value)
                })
            }
            ResponseRewriterConfig::Script { code } => {
                let script = ScriptRewriter::compile(&code)?;
                chain.push(name, ResponseStage::Text(Arc::new(script)))
            }
        };
    }
    Ok(chain)
}

/// Regex replacement over body text, optionally limited to some media types.
struct ReplaceText {
    regex: Regex,
    replacement: String,
    /// Lower-cased; empty means any textual body
    content_types: Vec<String>,
}

impl ResponseBodyTransformer for ReplaceText {
    fn transform(&self, _head: &mut ResponseHead, body: &str) -> Result<Option<String>> {
        match self.regex.replace_all(body, self.replacement.as_str()) {
            std::borrow::Cow::Borrowed(_) => Ok(None),
            std::borrow::Cow::Owned(s) => Ok(Some(s)),
        }
    }

    fn accepts(&self, head: &ResponseHead) -> bool {
        if self.content_types.is_empty() {
            return head.is_textual();
        }
        head.mime()
            .is_some_and(|mime| self.content_types.iter().any(|ct| *ct == mime))
    }
}

/// Reject expressions that do not parse, using an empty document.
fn check_xpath(xpath: &str) -> Result<()> {
    let package = sxd_document::Package::new();
    let document = package.as_document();
    sxd_xpath::evaluate_xpath(&document, xpath)
        .map(|_| ())
        .map_err(|e| anyhow!("invalid xpath '{xpath}': {e:?}"))
}

fn set_xpath_text(doc: &Document<'_>, xpath: &str, value: &str) -> Result<()> {
    let result =
        sxd_xpath::evaluate_xpath(doc, xpath).map_err(|e| anyhow!("xpath '{xpath}': {e:?}"))?;
    if let Value::Nodeset(nodes) = result {
        for node in nodes.iter() {
            match node {
                Node::Element(element) => {
                    element.set_text(value);
                }
                Node::Text(text) => {
                    text.set_text(value);
                }
                _ => {}
            }
        }
    }
    Ok(())
}

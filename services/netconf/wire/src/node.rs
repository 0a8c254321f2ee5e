//! Minimal XML element tree used for RPC payloads and replies.
//!
//! NETCONF payloads are carried as [`XmlNode`] trees. The schema-aware codec
//! layer lives elsewhere; this tree only knows element names, the default
//! namespace, attributes, text and children.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::WireError;

/// A single XML element with its subtree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    /// Local element name
    pub name: String,
    /// Default namespace declared on this element, if any
    pub namespace: Option<String>,
    /// Attributes in document order (excluding the default `xmlns`)
    pub attributes: Vec<(String, String)>,
    /// Child elements in document order
    pub children: Vec<XmlNode>,
    /// Concatenated character data directly under this element
    pub text: Option<String>,
}

impl XmlNode {
    /// Create an empty element
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Create a leaf element carrying text
    pub fn leaf(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name).with_text(text)
    }

    /// Set the default namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Append an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Append a child element
    pub fn with_child(mut self, child: XmlNode) -> Self {
        self.children.push(child);
        self
    }

    /// Append several child elements
    pub fn with_children<I: IntoIterator<Item = XmlNode>>(mut self, children: I) -> Self {
        self.children.extend(children);
        self
    }

    /// Set the text content
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// First child with the given local name
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given local name
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Attribute value, matching either the exact key or a prefixed `p:key`
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key || k.rsplit_once(':').map(|(_, local)| local) == Some(key))
            .map(|(_, v)| v.as_str())
    }

    /// Text content, or an empty string
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// True when the element has neither children nor text
    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.text.as_deref().map_or(true, |t| t.trim().is_empty())
    }

    /// Serialize this element and its subtree
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    /// Serialize only the children of this element
    pub fn inner_xml(&self) -> String {
        let mut out = String::new();
        if let Some(text) = &self.text {
            out.push_str(&escape(text.as_str()));
        }
        for child in &self.children {
            child.write_xml(&mut out);
        }
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        if let Some(ns) = &self.namespace {
            out.push_str(" xmlns=\"");
            out.push_str(&escape(ns.as_str()));
            out.push('"');
        }
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }

        if self.children.is_empty() && self.text.is_none() {
            out.push_str("/>");
            return;
        }

        out.push('>');
        out.push_str(&self.inner_xml());
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }

    /// Parse a complete XML document into its root element
    pub fn parse(xml: &str) -> Result<XmlNode, WireError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => stack.push(element_from(&start)?),
                Event::Empty(start) => {
                    let node = element_from(&start)?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| WireError::Xml("unbalanced end tag".into()))?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::Text(text) => {
                    let value = text.unescape()?;
                    push_text(&mut stack, &value);
                }
                Event::CData(data) => {
                    let raw = data.into_inner();
                    let value = std::str::from_utf8(&raw).map_err(|_| WireError::Utf8)?;
                    push_text(&mut stack, value);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(WireError::Xml("unterminated element".into()));
        }
        root.ok_or(WireError::Missing("root element"))
    }
}

fn element_from(start: &BytesStart<'_>) -> Result<XmlNode, WireError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut node = XmlNode::new(name);

    for attr in start.attributes() {
        let attr = attr.map_err(|e| WireError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        if key == "xmlns" {
            node.namespace = Some(value);
        } else {
            node.attributes.push((key, value));
        }
    }

    Ok(node)
}

fn attach(
    stack: &mut [XmlNode],
    root: &mut Option<XmlNode>,
    node: XmlNode,
) -> Result<(), WireError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        Ok(())
    } else if root.is_none() {
        *root = Some(node);
        Ok(())
    } else {
        Err(WireError::Xml("multiple root elements".into()))
    }
}

fn push_text(stack: &mut [XmlNode], value: &str) {
    if let Some(top) = stack.last_mut() {
        top.text.get_or_insert_with(String::new).push_str(value);
    }
}

//! Textual XML documents: the form binary documents decode to and the input
//! of the encoders.

use std::collections::BTreeMap;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::block::error::{ArscError, ArscResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlAttribute {
    pub prefix: Option<String>,
    pub namespace_uri: Option<String>,
    pub name: String,
    pub value: String,
}

impl XmlAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        XmlAttribute {
            prefix: None,
            namespace_uri: None,
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn with_namespace(
        prefix: impl Into<String>,
        uri: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        XmlAttribute {
            prefix: Some(prefix.into()),
            namespace_uri: Some(uri.into()),
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn qualified_name(&self) -> String {
        qualified_name(self.prefix.as_deref(), &self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XmlContent {
    Element(XmlElement),
    Text(String),
}

/// DOM-style element. `namespaces` are the `xmlns` declarations made on this
/// element, as `(prefix, uri)` with an empty prefix for the default one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlElement {
    pub prefix: Option<String>,
    pub namespace_uri: Option<String>,
    pub name: String,
    pub namespaces: Vec<(String, String)>,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<XmlContent>,
    pub line: u32,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        XmlElement {
            prefix: None,
            namespace_uri: None,
            name: name.into(),
            namespaces: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
            line: 0,
        }
    }

    pub fn qualified_name(&self) -> String {
        qualified_name(self.prefix.as_deref(), &self.name)
    }

    /// Attribute by `name` or `prefix:name`.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        let (prefix, local) = split_qname(name);
        self.attributes
            .iter()
            .find(|attr| attr.name == local && attr.prefix.as_deref() == prefix)
            .map(|attr| attr.value.as_str())
    }

    pub fn attribute_ns(&self, namespace_uri: Option<&str>, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name && attr.namespace_uri.as_deref() == namespace_uri)
            .map(|attr| attr.value.as_str())
    }

    pub fn set_attribute(&mut self, attribute: XmlAttribute) {
        match self
            .attributes
            .iter_mut()
            .find(|attr| attr.name == attribute.name && attr.prefix == attribute.prefix)
        {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<XmlAttribute> {
        let (prefix, local) = split_qname(name);
        let index = self
            .attributes
            .iter()
            .position(|attr| attr.name == local && attr.prefix.as_deref() == prefix)?;
        Some(self.attributes.remove(index))
    }

    pub fn append_child(&mut self, child: XmlElement) {
        self.children.push(XmlContent::Element(child));
    }

    /// Appends text, merging it into a directly preceding text node.
    pub fn push_text(&mut self, text: &str) {
        if let Some(XmlContent::Text(last)) = self.children.last_mut() {
            last.push_str(text);
            return;
        }
        self.children.push(XmlContent::Text(text.to_string()));
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|child| match child {
            XmlContent::Element(element) => Some(element),
            XmlContent::Text(_) => None,
        })
    }

    pub fn find_child(&self, name: &str) -> Option<&XmlElement> {
        self.child_elements().find(|child| child.name == name)
    }

    pub fn has_child_elements(&self) -> bool {
        self.child_elements().next().is_some()
    }

    /// Concatenated text of this element and all its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }
}

fn collect_text(element: &XmlElement, out: &mut String) {
    for child in &element.children {
        match child {
            XmlContent::Text(text) => out.push_str(text),
            XmlContent::Element(element) => collect_text(element, out),
        }
    }
}

fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

fn qualified_name(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{local}"),
        _ => local.to_string(),
    }
}

fn lookup_namespace_uri(stack: &[BTreeMap<String, String>], prefix: Option<&str>) -> Option<String> {
    let key = prefix.unwrap_or("");
    stack
        .iter()
        .rev()
        .find_map(|frame| frame.get(key))
        .cloned()
}

fn utf8(bytes: &[u8]) -> ArscResult<&str> {
    std::str::from_utf8(bytes).map_err(|err| ArscError::Xml(err.to_string()))
}

struct PendingAttribute {
    prefix: Option<String>,
    local_name: String,
    value: String,
}

fn extract_attributes(
    start: &BytesStart<'_>,
) -> ArscResult<(Vec<(String, String)>, Vec<PendingAttribute>)> {
    let mut namespaces = Vec::new();
    let mut attrs = Vec::new();
    for attr in start.attributes().with_checks(false) {
        let attr = attr?;
        let key = utf8(attr.key.as_ref())?.to_string();
        let value = attr.unescape_value()?.into_owned();
        if key == "xmlns" {
            namespaces.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            namespaces.push((prefix.to_string(), value));
        } else {
            let (prefix, local) = split_qname(&key);
            attrs.push(PendingAttribute {
                prefix: prefix.map(str::to_string),
                local_name: local.to_string(),
                value,
            });
        }
    }
    Ok((namespaces, attrs))
}

fn build_element(
    start: &BytesStart<'_>,
    namespace_stack: &mut Vec<BTreeMap<String, String>>,
    line: u32,
) -> ArscResult<XmlElement> {
    let (namespaces, attrs) = extract_attributes(start)?;
    namespace_stack.push(namespaces.iter().cloned().collect());
    let name = start.name();
    let (prefix, local) = split_qname(utf8(name.as_ref())?);
    let mut element = XmlElement::new(local);
    element.namespace_uri = lookup_namespace_uri(namespace_stack, prefix);
    element.prefix = prefix.map(str::to_string);
    element.namespaces = namespaces;
    element.line = line;
    element.attributes = attrs
        .into_iter()
        .map(|attr| XmlAttribute {
            namespace_uri: attr
                .prefix
                .as_deref()
                .and_then(|prefix| lookup_namespace_uri(namespace_stack, Some(prefix))),
            prefix: attr.prefix,
            name: attr.local_name,
            value: attr.value,
        })
        .collect();
    Ok(element)
}

fn attach_element(
    stack: &mut Vec<XmlElement>,
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> ArscResult<()> {
    if let Some(parent) = stack.last_mut() {
        parent.append_child(element);
    } else if root.is_none() {
        *root = Some(element);
    } else {
        return Err(ArscError::Xml("multiple root elements".to_string()));
    }
    Ok(())
}

/// Tracks line numbers as the reader advances.
struct LineCounter<'a> {
    xml: &'a str,
    offset: usize,
    line: u32,
}

impl<'a> LineCounter<'a> {
    fn line_at(&mut self, offset: usize) -> u32 {
        let offset = offset.min(self.xml.len());
        if offset > self.offset {
            self.line += self.xml.as_bytes()[self.offset..offset]
                .iter()
                .filter(|byte| **byte == b'\n')
                .count() as u32;
            self.offset = offset;
        }
        self.line
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlDocument {
    pub root: XmlElement,
}

impl XmlDocument {
    pub fn new(root: XmlElement) -> Self {
        XmlDocument { root }
    }

    /// Parses a textual document. Whitespace-only text between elements is
    /// dropped; other text is kept verbatim.
    pub fn from_string(xml: &str) -> ArscResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);
        let mut lines = LineCounter {
            xml,
            offset: 0,
            line: 1,
        };
        let mut buffer = Vec::new();
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;
        let mut namespace_stack: Vec<BTreeMap<String, String>> = vec![BTreeMap::new()];

        loop {
            let position = reader.buffer_position() as usize;
            match reader.read_event_into(&mut buffer)? {
                Event::Start(start) => {
                    let line = lines.line_at(position);
                    let element = build_element(&start, &mut namespace_stack, line)?;
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let line = lines.line_at(position);
                    let element = build_element(&start, &mut namespace_stack, line)?;
                    namespace_stack.pop();
                    attach_element(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| ArscError::Xml("unbalanced end tag".to_string()))?;
                    if namespace_stack.len() <= 1 {
                        return Err(ArscError::Xml("namespace stack underflow".to_string()));
                    }
                    namespace_stack.pop();
                    attach_element(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        let raw = text.unescape()?;
                        if !raw.trim().is_empty() {
                            current.push_text(&raw);
                        }
                    }
                }
                Event::CData(text) => {
                    if let Some(current) = stack.last_mut() {
                        current.push_text(utf8(text.as_ref())?);
                    }
                }
                Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
            buffer.clear();
        }

        if !stack.is_empty() {
            return Err(ArscError::Xml("unclosed elements".to_string()));
        }
        let root = root.ok_or_else(|| ArscError::Xml("document has no root element".to_string()))?;
        Ok(XmlDocument { root })
    }

    pub fn to_string(&self) -> ArscResult<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        write_element(&self.root, &mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(|err| ArscError::Xml(err.to_string()))
    }
}

fn write_element(element: &XmlElement, writer: &mut Writer<Vec<u8>>) -> ArscResult<()> {
    let name = element.qualified_name();
    let mut start = BytesStart::new(name.as_str());
    for (prefix, uri) in &element.namespaces {
        let key = if prefix.is_empty() {
            "xmlns".to_string()
        } else {
            format!("xmlns:{}", prefix)
        };
        start.push_attribute((key.as_str(), uri.as_str()));
    }
    for attr in &element.attributes {
        start.push_attribute((attr.qualified_name().as_str(), attr.value.as_str()));
    }
    if element.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }
    writer.write_event(Event::Start(start))?;
    for child in &element.children {
        match child {
            XmlContent::Element(child) => write_element(child, writer)?,
            XmlContent::Text(text) => writer.write_event(Event::Text(BytesText::new(text)))?,
        }
    }
    writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<LinearLayout xmlns:android="http://schemas.android.com/apk/res/android"
    android:orientation="vertical">
    <TextView android:text="Hello &amp; bye"/>
    <Button>Press</Button>
</LinearLayout>"#;

    #[test]
    fn parses_namespaces_and_lines() {
        let document = XmlDocument::from_string(LAYOUT).unwrap();
        let root = &document.root;
        assert_eq!(root.name, "LinearLayout");
        assert_eq!(root.line, 2);
        assert_eq!(
            root.namespaces,
            vec![(
                "android".to_string(),
                "http://schemas.android.com/apk/res/android".to_string()
            )]
        );
        assert_eq!(root.attribute("android:orientation"), Some("vertical"));
        let text_view = root.find_child("TextView").unwrap();
        assert_eq!(text_view.line, 4);
        assert_eq!(
            text_view.attribute_ns(Some("http://schemas.android.com/apk/res/android"), "text"),
            Some("Hello & bye")
        );
        assert_eq!(root.find_child("Button").unwrap().text(), "Press");
    }

    #[test]
    fn written_document_parses_back() {
        let document = XmlDocument::from_string(LAYOUT).unwrap();
        let written = document.to_string().unwrap();
        let reparsed = XmlDocument::from_string(&written).unwrap();
        assert_eq!(reparsed.root.child_elements().count(), 2);
        assert_eq!(reparsed.root.attribute("android:orientation"), Some("vertical"));
    }

    #[test]
    fn second_root_is_rejected() {
        assert!(XmlDocument::from_string("<a/><b/>").is_err());
    }

    #[test]
    fn mixed_content_keeps_spacing() {
        let document = XmlDocument::from_string("<string>Hello <b>World</b>!</string>").unwrap();
        assert_eq!(document.root.children.len(), 3);
        assert_eq!(document.root.text(), "Hello World!");
    }
}

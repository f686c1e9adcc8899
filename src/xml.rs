//! Schema-less XML tree.
//!
//! SAML responses nest signatures, extensions and vendor elements in ways no
//! fixed schema captures, so the document is read into a generic owned tree
//! and searched by local name.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::LoginError;

/// An element with its namespace prefix stripped from names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Unescaped character data directly inside this element.
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Depth-first, pre-order iteration over this element and every descendant.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }

    pub fn parse(xml: &[u8]) -> Result<Self, LoginError> {
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);

        let mut open: Vec<Element> = Vec::new();
        let mut root = None;
        let mut buf = Vec::new();

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| malformed(format!("XML parse error: {e}")))?;
            match event {
                Event::Start(ref e) => open.push(start_element(e)?),
                Event::Empty(ref e) => {
                    let element = start_element(e)?;
                    close(element, &mut open, &mut root)?;
                }
                Event::End(_) => {
                    let element = open
                        .pop()
                        .ok_or_else(|| malformed("unexpected closing tag".to_string()))?;
                    close(element, &mut open, &mut root)?;
                }
                Event::Text(ref e) => {
                    let text = e
                        .unescape()
                        .map_err(|e| malformed(format!("invalid character data: {e}")))?;
                    if let Some(current) = open.last_mut() {
                        current.text.push_str(&text);
                    }
                }
                Event::CData(ref e) => {
                    if let Some(current) = open.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(e));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if let Some(element) = open.last() {
            return Err(malformed(format!("unclosed element <{}>", element.name)));
        }
        root.ok_or_else(|| malformed("document has no root element".to_string()))
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let element = self.stack.pop()?;
        self.stack.extend(element.children.iter().rev());
        Some(element)
    }
}

fn start_element(start: &BytesStart<'_>) -> Result<Element, LoginError> {
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| malformed(format!("invalid attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.local_name().into_inner()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| malformed(format!("invalid attribute value: {e}")))?
            .to_string();
        attributes.push((key, value));
    }

    Ok(Element {
        name: String::from_utf8_lossy(start.local_name().into_inner()).to_string(),
        attributes,
        ..Element::default()
    })
}

fn close(element: Element, open: &mut [Element], root: &mut Option<Element>) -> Result<(), LoginError> {
    match open.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(malformed("multiple root elements".to_string())),
    }
    Ok(())
}

fn malformed(message: String) -> LoginError {
    LoginError::MalformedAssertion(message)
}

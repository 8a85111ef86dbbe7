//! Namespace-agnostic XML element tree for the SWIM decoders.
//!
//! Every feed family arrives with its own namespace prefixes (and sometimes
//! none at all), so elements and attributes are matched by local name only.
//! The tree is fully owned; payloads are small enough that streaming is not
//! worth the complexity in the decoders.

use anyhow::{Result, bail};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// One XML element with namespace prefixes stripped from its name and from
/// all attribute keys.
#[derive(Debug, Clone, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    /// Attribute value by local name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First direct child with the given local name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All direct children with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Depth-first search for the first descendant (including self) with the
    /// given local name.
    pub fn descendant(&self, name: &str) -> Option<&Element> {
        if self.name == name {
            return Some(self);
        }
        for c in &self.children {
            if let Some(found) = c.descendant(name) {
                return Some(found);
            }
        }
        None
    }

    /// Trimmed text content of this element, or None when empty.
    pub fn text_value(&self) -> Option<&str> {
        let t = self.text.trim();
        if t.is_empty() { None } else { Some(t) }
    }

    /// Trimmed text of a direct child.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(|c| c.text_value())
    }

    /// Attribute if present, else the text of a same-named child. The SWIM
    /// producers are inconsistent about which form they emit.
    pub fn attr_or_child(&self, name: &str) -> Option<&str> {
        self.attr(name).or_else(|| self.child_text(name))
    }

    /// True when the element carries `xsi:nil="true"` (matched by local
    /// attribute name).
    pub fn is_nil(&self) -> bool {
        self.attr("nil").map(|v| v == "true").unwrap_or(false)
    }

    /// Walk every element in the tree, yielding its slash-joined local-name
    /// path, for the discovery telemetry.
    pub fn walk_paths<F: FnMut(&str, &Element)>(&self, f: &mut F) {
        fn rec<F: FnMut(&str, &Element)>(el: &Element, prefix: &str, f: &mut F) {
            let path = if prefix.is_empty() {
                el.name.clone()
            } else {
                format!("{}/{}", prefix, el.name)
            };
            f(&path, el);
            for c in &el.children {
                rec(c, &path, f);
            }
        }
        rec(self, "", f);
    }
}

fn local_name(raw: &[u8]) -> String {
    let raw = match raw.iter().rposition(|&b| b == b':') {
        Some(idx) => &raw[idx + 1..],
        None => raw,
    };
    String::from_utf8_lossy(raw).into_owned()
}

fn element_from_start(start: &BytesStart) -> Result<Element> {
    let mut el = Element {
        name: local_name(start.name().as_ref()),
        ..Default::default()
    };
    for attr in start.attributes().with_checks(false) {
        let attr = attr?;
        let key = local_name(attr.key.as_ref());
        // Drop namespace declarations, keep everything else (including
        // xsi:nil, reduced to "nil")
        if key == "xmlns" {
            continue;
        }
        let value = attr.unescape_value()?.into_owned();
        el.attributes.push((key, value));
    }
    Ok(el)
}

/// Parse an XML document into an element tree rooted at its single document
/// element.
pub fn parse(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                stack.push(element_from_start(&start)?);
            }
            Event::Empty(start) => {
                let el = element_from_start(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(el),
                    None => return Ok(el),
                }
            }
            Event::End(_) => {
                let done = match stack.pop() {
                    Some(el) => el,
                    None => bail!("unbalanced end tag"),
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(done),
                    None => return Ok(done),
                }
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => bail!("document ended without a root element"),
            _ => {}
        }
    }
}

/// Tri-state for clearable wire fields: absent from the message, present but
/// explicitly nil, or present with a value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Clearable<T> {
    #[default]
    Absent,
    Nil,
    Value(T),
}

impl<T> Clearable<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Clearable::Absent)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Clearable::Value(v) => Some(v),
            _ => None,
        }
    }
}

//! MyBatis-style XML mapper parsing.
//!
//! The document is first read into a plain element tree with quick-xml,
//! then converted into [`Node`]s. Unknown dynamic elements are rejected so
//! that a typo cannot silently drop a fragment.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::expr;
use super::node::{Foreach, Node, Trim};

/// Statements and `<sql>` fragments declared by one `<mapper>` document.
#[derive(Debug, Default)]
pub struct MapperDocument {
    pub namespace: String,
    pub statements: Vec<(String, Vec<Node>)>,
    pub fragments: Vec<(String, Vec<Node>)>,
}

#[derive(Debug)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

#[derive(Debug)]
enum XmlNode {
    Element(Element),
    Text(String),
}

impl Element {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn required(&self, key: &str) -> Result<&str, String> {
        self.attr(key)
            .ok_or_else(|| format!("<{}> is missing attribute `{key}`", self.name))
    }
}

fn start_element(e: &BytesStart<'_>) -> Result<Element, String> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        attrs.push((key, value));
    }
    Ok(Element {
        name,
        attrs,
        children: Vec::new(),
    })
}

fn read_tree(xml: &str) -> Result<Element, String> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let position = reader.buffer_position();
        let event = reader
            .read_event()
            .map_err(|e| format!("at byte {position}: {e}"))?;

        match event {
            Event::Start(e) => stack.push(start_element(&e)?),
            Event::Empty(e) => {
                let element = start_element(&e)?;
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| format!("unbalanced closing tag at byte {position}"))?;
                attach(&mut stack, &mut root, element);
            }
            Event::Text(t) => {
                if let Some(parent) = stack.last_mut() {
                    let text = t.unescape().map_err(|e| e.to_string())?.into_owned();
                    parent.children.push(XmlNode::Text(text));
                }
            }
            Event::CData(c) => {
                if let Some(parent) = stack.last_mut() {
                    let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                    parent.children.push(XmlNode::Text(text));
                }
            }
            Event::Eof => break,
            // declarations, comments, doctype, processing instructions
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err("unexpected end of document".into());
    }
    root.ok_or_else(|| "document has no root element".into())
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None => *root = Some(element),
    }
}

fn split_overrides(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn parse_test(element: &Element) -> Result<expr::Expr, String> {
    let src = element.required("test")?;
    expr::parse(src).map_err(|e| format!("invalid test `{src}`: {e}"))
}

fn convert(children: Vec<XmlNode>) -> Result<Vec<Node>, String> {
    let mut nodes = Vec::with_capacity(children.len());

    for child in children {
        let element = match child {
            XmlNode::Text(text) => {
                nodes.push(Node::Text(text));
                continue;
            }
            XmlNode::Element(element) => element,
        };

        let node = match element.name.as_str() {
            "if" => Node::If {
                test: parse_test(&element)?,
                children: convert(element.children)?,
            },
            "choose" => {
                let mut whens = Vec::new();
                let mut otherwise = None;
                for branch in element.children {
                    let XmlNode::Element(branch) = branch else {
                        continue;
                    };
                    match branch.name.as_str() {
                        "when" => {
                            let test = parse_test(&branch)?;
                            whens.push((test, convert(branch.children)?));
                        }
                        "otherwise" => otherwise = Some(convert(branch.children)?),
                        other => return Err(format!("unexpected <{other}> inside <choose>")),
                    }
                }
                Node::Choose { whens, otherwise }
            }
            "where" => Node::Trim(Trim::where_clause(convert(element.children)?)),
            "set" => Node::Trim(Trim::set_clause(convert(element.children)?)),
            "trim" => Node::Trim(Trim {
                prefix: element.attr("prefix").unwrap_or_default().to_string(),
                suffix: element.attr("suffix").unwrap_or_default().to_string(),
                prefix_overrides: split_overrides(element.attr("prefixOverrides")),
                suffix_overrides: split_overrides(element.attr("suffixOverrides")),
                children: convert(element.children)?,
            }),
            "foreach" => Node::Foreach(Foreach {
                collection: element.required("collection")?.to_string(),
                item: element.attr("item").unwrap_or("item").to_string(),
                index: element.attr("index").map(str::to_string),
                open: element.attr("open").unwrap_or_default().to_string(),
                close: element.attr("close").unwrap_or_default().to_string(),
                separator: element.attr("separator").unwrap_or_default().to_string(),
                children: convert(element.children)?,
            }),
            "bind" => {
                let name = element.required("name")?.to_string();
                let src = element.required("value")?;
                let value = expr::parse(src).map_err(|e| format!("invalid bind `{src}`: {e}"))?;
                Node::Bind { name, value }
            }
            "include" => Node::Include {
                refid: element.required("refid")?.to_string(),
            },
            other => return Err(format!("unsupported element <{other}>")),
        };
        nodes.push(node);
    }

    Ok(nodes)
}

/// Parse one mapper document.
pub fn parse_document(xml: &str) -> Result<MapperDocument, String> {
    let root = read_tree(xml)?;
    if root.name != "mapper" {
        return Err(format!("root element is <{}>, expected <mapper>", root.name));
    }

    let mut doc = MapperDocument {
        namespace: root.required("namespace")?.to_string(),
        ..MapperDocument::default()
    };

    for child in root.children {
        let XmlNode::Element(element) = child else {
            continue;
        };
        match element.name.as_str() {
            "select" | "insert" | "update" | "delete" => {
                let id = element.required("id")?.to_string();
                doc.statements.push((id, convert(element.children)?));
            }
            "sql" => {
                let id = element.required("id")?.to_string();
                doc.fragments.push((id, convert(element.children)?));
            }
            // resultMap, cache and friends carry no SQL
            _ => {}
        }
    }

    Ok(doc)
}

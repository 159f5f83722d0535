//! content stream of a collection
//!
//! reading a collection yields either the configured alternative child (for
//! example an `index.html`) or a small XML document listing the children.

use std::io::{Cursor, Read};

use crate::error::Result;
use crate::node::Node;
use crate::types::NodeKind;

pub(crate) fn collection_stream(node: &Node) -> Result<Box<dyn Read + Send>> {
    if let Some(alternative) = &node.repository().config().directory_alternative {
        if node.has_child(alternative) {
            let child = node.child(alternative)?;
            if child.is_resource()? {
                return child.open_read();
            }
        }
    }
    Ok(Box::new(Cursor::new(render(node)?.into_bytes())))
}

/// XML listing of a collection's immediate children
pub fn render(node: &Node) -> Result<String> {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<collection path=\"{}\" name=\"{}\">\n",
        escape_attr(node.path()),
        escape_attr(node.name())
    ));
    for child in node.children()? {
        let element = match child.kind()? {
            NodeKind::Resource => "resource",
            NodeKind::Collection => "collection",
        };
        out.push_str(&format!(
            "  <{} path=\"{}\" name=\"{}\"/>\n",
            element,
            escape_attr(child.path()),
            escape_attr(child.name())
        ));
    }
    out.push_str("</collection>\n");
    Ok(out)
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

use crate::Document;
use crate::node::NodeRef;

/// Pre-order walk over `root` and its descendants.
pub fn descendants(doc: &Document, root: NodeRef) -> Descendants<'_> {
    let stack = if doc.is_live(root) { vec![root] } else { Vec::new() };
    Descendants { doc, stack }
}

pub struct Descendants<'a> {
    doc: &'a Document,
    stack: Vec<NodeRef>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeRef;

    fn next(&mut self) -> Option<NodeRef> {
        let node = self.stack.pop()?;
        // reversed so the first child is visited first
        self.stack
            .extend(self.doc.children(node).iter().rev().copied());
        Some(node)
    }
}

/// Parent chain of `node`, nearest first, excluding `node` itself.
pub fn ancestors(doc: &Document, node: NodeRef) -> Ancestors<'_> {
    Ancestors {
        doc,
        current: doc.parent(node),
    }
}

pub struct Ancestors<'a> {
    doc: &'a Document,
    current: Option<NodeRef>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeRef;

    fn next(&mut self) -> Option<NodeRef> {
        let node = self.current?;
        self.current = self.doc.parent(node);
        Some(node)
    }
}

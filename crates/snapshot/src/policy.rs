use dom::{Document, NodeData, NodeRef};
use serde::Deserialize;

/// Text that replaces script bodies when scripts are serialized at all.
pub const SCRIPT_PLACEHOLDER: &str = "SCRIPT_PLACEHOLDER";

/// Which nodes are blocked, ignored or masked during capture.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NodePolicy {
    /// Elements with this class are kept as empty placeholders.
    pub block_class: String,
    /// Elements with this class are left out entirely.
    pub ignore_class: String,
    /// Text below an element with this class is replaced by `*`.
    pub mask_text_class: String,
    pub slim_scripts: bool,
    pub slim_comments: bool,
}

impl Default for NodePolicy {
    fn default() -> Self {
        Self {
            block_class: "rr-block".to_string(),
            ignore_class: "rr-ignore".to_string(),
            mask_text_class: "rr-mask".to_string(),
            slim_scripts: true,
            slim_comments: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    /// Serialize as a childless placeholder.
    Block,
    /// Omit and mark ignored.
    Ignore,
}

impl NodePolicy {
    /// Verdict for one node, judged on its own data only.
    pub fn verdict(&self, data: &NodeData) -> Verdict {
        match data {
            NodeData::Element { tag, .. } => {
                if self.slim_scripts && tag == "script" {
                    Verdict::Ignore
                } else if data.has_class(&self.ignore_class) {
                    Verdict::Ignore
                } else if data.has_class(&self.block_class) {
                    Verdict::Block
                } else {
                    Verdict::Keep
                }
            }
            NodeData::Comment(_) if self.slim_comments => Verdict::Ignore,
            _ => Verdict::Keep,
        }
    }

    /// True when some strict ancestor of `node` hides its subtree (blocked
    /// or ignored). Such nodes never get ids.
    pub fn is_hidden_by_ancestor(&self, doc: &Document, node: NodeRef) -> bool {
        dom::traverse::ancestors(doc, node).any(|a| {
            doc.data(a)
                .is_some_and(|d| self.verdict(d) != Verdict::Keep)
        })
    }

    /// True when text under `node` must be masked.
    pub fn needs_masking(&self, doc: &Document, node: NodeRef) -> bool {
        std::iter::once(node)
            .chain(dom::traverse::ancestors(doc, node))
            .any(|n| {
                doc.data(n)
                    .is_some_and(|d| d.has_class(&self.mask_text_class))
            })
    }
}

/// Replace every non-whitespace character with `*`.
pub fn mask_text(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_whitespace() { c } else { '*' })
        .collect()
}

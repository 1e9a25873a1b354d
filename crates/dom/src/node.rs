use core_types::DocId;

/// Generational handle into a [`crate::Document`] arena.
///
/// A handle never keeps its node alive. Once the node is destroyed the slot
/// generation moves on and the stale handle stops resolving.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeRef {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Node handle that is unique across every document of a [`crate::Host`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle {
    pub doc: DocId,
    pub node: NodeRef,
}

impl NodeHandle {
    pub fn new(doc: DocId, node: NodeRef) -> Self {
        Self { doc, node }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    DocumentType,
    Element,
    Text,
    Comment,
    CData,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeData {
    Document,
    DocumentType {
        name: String,
        public_id: String,
        system_id: String,
    },
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
    },
    Text(String),
    Comment(String),
    CData(String),
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::Document => NodeKind::Document,
            NodeData::DocumentType { .. } => NodeKind::DocumentType,
            NodeData::Element { .. } => NodeKind::Element,
            NodeData::Text(_) => NodeKind::Text,
            NodeData::Comment(_) => NodeKind::Comment,
            NodeData::CData(_) => NodeKind::CData,
        }
    }

    pub fn allows_children(&self) -> bool {
        matches!(self, NodeData::Document | NodeData::Element { .. })
    }

    pub fn tag_name(&self) -> Option<&str> {
        match self {
            NodeData::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        match self {
            NodeData::Element { attributes, .. } => attributes
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    /// True when the element's `class` attribute lists `class`.
    pub fn has_class(&self, class: &str) -> bool {
        self.attribute("class")
            .is_some_and(|value| value.split_ascii_whitespace().any(|c| c == class))
    }

    pub fn character_data(&self) -> Option<&str> {
        match self {
            NodeData::Text(text) | NodeData::Comment(text) | NodeData::CData(text) => Some(text),
            _ => None,
        }
    }

    /// Elements that host a nested browsing context.
    pub fn is_frame_element(&self) -> bool {
        self.tag_name()
            .is_some_and(|tag| tag == "iframe" || tag == "frame")
    }
}

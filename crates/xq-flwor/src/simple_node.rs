//! Minimal in-memory nodes produced by element constructors and used in tests.
//!
//! Nodes are immutable once built and compare by identity: two separately
//! constructed `<x/>` elements are never equal, a clone of a node is.
//!
//! ```
//! use xq_flwor::simple_node::{elem, text};
//!
//! // <root><child>Hello</child><child/></root>
//! let root = elem("root")
//!     .child(elem("child").child(text("Hello")))
//!     .child(elem("child"))
//!     .build();
//! assert_eq!(root.name(), Some("root"));
//! assert_eq!(root.children().len(), 2);
//! assert_eq!(root.string_value(), "Hello");
//! ```
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Element,
    Text,
}

#[derive(Debug)]
struct Inner {
    kind: NodeKind,
    name: Option<String>,
    value: Option<String>,
    children: Vec<SimpleNode>,
}

/// A simple Arc-backed node implementation.
#[derive(Clone)]
pub struct SimpleNode(Arc<Inner>);

impl PartialEq for SimpleNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for SimpleNode {}
impl std::hash::Hash for SimpleNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for SimpleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleNode")
            .field("kind", &self.0.kind)
            .field("name", &self.0.name)
            .field("value", &self.0.value)
            .field("children", &self.0.children.len())
            .finish()
    }
}

impl fmt::Display for SimpleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.kind {
            NodeKind::Text => f.write_str(self.0.value.as_deref().unwrap_or_default()),
            NodeKind::Element => {
                let name = self.0.name.as_deref().unwrap_or_default();
                if self.0.children.is_empty() {
                    return write!(f, "<{name}/>");
                }
                write!(f, "<{name}>")?;
                for c in &self.0.children {
                    write!(f, "{c}")?;
                }
                write!(f, "</{name}>")
            }
        }
    }
}

impl SimpleNode {
    pub fn kind(&self) -> NodeKind {
        self.0.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn children(&self) -> &[SimpleNode] {
        &self.0.children
    }

    /// Concatenated text descendants (elements) or the text content itself.
    pub fn string_value(&self) -> String {
        match self.0.kind {
            NodeKind::Text => self.0.value.clone().unwrap_or_default(),
            NodeKind::Element => {
                let mut out = String::new();
                self.collect_text(&mut out);
                out
            }
        }
    }

    fn collect_text(&self, out: &mut String) {
        match self.0.kind {
            NodeKind::Text => out.push_str(self.0.value.as_deref().unwrap_or_default()),
            NodeKind::Element => {
                for c in &self.0.children {
                    c.collect_text(out);
                }
            }
        }
    }

    /// Copy with fresh identity for the node and all of its descendants.
    pub fn deep_copy(&self) -> SimpleNode {
        SimpleNode(Arc::new(Inner {
            kind: self.0.kind,
            name: self.0.name.clone(),
            value: self.0.value.clone(),
            children: self.0.children.iter().map(SimpleNode::deep_copy).collect(),
        }))
    }
}

pub struct SimpleNodeBuilder {
    name: String,
    children: Vec<SimpleNode>,
}

impl SimpleNodeBuilder {
    #[must_use]
    pub fn child(mut self, child: impl Into<SimpleNode>) -> Self {
        self.children.push(child.into());
        self
    }

    #[must_use]
    pub fn children(mut self, children: impl IntoIterator<Item = SimpleNode>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn build(self) -> SimpleNode {
        // adjacent text children merge, empty ones vanish
        let mut children: Vec<SimpleNode> = Vec::with_capacity(self.children.len());
        for c in self.children {
            if c.kind() == NodeKind::Text {
                let value = c.string_value();
                if value.is_empty() {
                    continue;
                }
                if let Some(last) = children.last_mut()
                    && last.kind() == NodeKind::Text
                {
                    *last = text(&(last.string_value() + &value));
                    continue;
                }
            }
            children.push(c);
        }
        SimpleNode(Arc::new(Inner { kind: NodeKind::Element, name: Some(self.name), value: None, children }))
    }
}

impl From<SimpleNodeBuilder> for SimpleNode {
    fn from(b: SimpleNodeBuilder) -> Self {
        b.build()
    }
}

pub fn elem(name: &str) -> SimpleNodeBuilder {
    SimpleNodeBuilder { name: name.to_string(), children: Vec::new() }
}

pub fn text(value: &str) -> SimpleNode {
    SimpleNode(Arc::new(Inner { kind: NodeKind::Text, name: None, value: Some(value.to_string()), children: Vec::new() }))
}

//! The parse tree node model.

use std::collections::HashMap;

/// Node types in the parse tree.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeKind {
    /// Root node of the tree, representing the parsed document. Its single
    /// argument is the page title.
    Root,
    /// Level-2 heading. Arguments are the title; children are the section
    /// contents.
    Level2,
    /// Level-3 heading.
    Level3,
    /// Level-4 heading.
    Level4,
    /// Level-5 heading.
    Level5,
    /// Level-6 heading.
    Level6,
    /// Content rendered in italic. Content is in children.
    Italic,
    /// Content rendered in bold. Content is in children.
    Bold,
    /// Horizontal rule. No arguments or children.
    Hline,
    /// A list. The prefix that opened the list is the scalar argument;
    /// children are the [`ListItem`](NodeKind::ListItem) nodes of this list.
    List,
    /// A list item. The item token is the scalar argument. Definition list
    /// items (prefix ending in `;`) carry their definition in
    /// [`WikiNode::definition`].
    ListItem,
    /// Preformatted text (space-indented lines) where markup is still
    /// interpreted.
    Preformatted,
    /// `<pre>` text where markup is not interpreted.
    Pre,
    /// An internal link `[[…]]`. Link parts are in args; a link trail is in
    /// children.
    Link,
    /// A template transclusion `{{…}}`. Name is the first argument.
    Template,
    /// A template argument reference `{{{…}}}`.
    TemplateArg,
    /// A parser function invocation, including predefined variables.
    ParserFn,
    /// An external URL. First argument is the URL, second the display text.
    Url,
    /// A table.
    Table,
    /// A table caption, under a table.
    TableCaption,
    /// A table row, under a table.
    TableRow,
    /// A table header cell, under a row.
    TableHeaderCell,
    /// A table data cell, under a row.
    TableCell,
    /// A magic word such as `__NOTOC__`, stored as the scalar argument.
    MagicWord,
    /// An HTML element. The tag name is the scalar argument, attributes are
    /// in attrs, and paired-tag content is in children.
    Html,
}

impl NodeKind {
    /// The heading level for title nodes (the root counts as level 1).
    pub(crate) fn heading_level(self) -> Option<u8> {
        Some(match self {
            NodeKind::Root => 1,
            NodeKind::Level2 => 2,
            NodeKind::Level3 => 3,
            NodeKind::Level4 => 4,
            NodeKind::Level5 => 5,
            NodeKind::Level6 => 6,
            _ => return None,
        })
    }

    /// Returns true for node types whose arguments are separated by
    /// vertical bars.
    pub(crate) fn has_args(self) -> bool {
        matches!(
            self,
            NodeKind::Link
                | NodeKind::Template
                | NodeKind::TemplateArg
                | NodeKind::ParserFn
                | NodeKind::Url
        )
    }

    /// Returns true for node types that warn when left unclosed.
    pub(crate) fn must_close(self) -> bool {
        matches!(
            self,
            NodeKind::Italic
                | NodeKind::Bold
                | NodeKind::Pre
                | NodeKind::Html
                | NodeKind::Link
                | NodeKind::Template
                | NodeKind::TemplateArg
                | NodeKind::ParserFn
                | NodeKind::Url
                | NodeKind::Table
        )
    }
}

/// One child of a node: either literal text or a nested node.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeChild {
    /// Literal text.
    Text(String),
    /// A nested node.
    Node(WikiNode),
}

impl NodeChild {
    /// The nested node, if this child is one.
    pub fn as_node(&self) -> Option<&WikiNode> {
        match self {
            NodeChild::Node(node) => Some(node),
            NodeChild::Text(_) => None,
        }
    }

    /// The text, if this child is literal text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            NodeChild::Text(text) => Some(text),
            NodeChild::Node(_) => None,
        }
    }
}

/// Node arguments: either pipe-separated argument slots (each a list of
/// children), or a scalar token such as a tag name or list prefix.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeArgs {
    /// Argument slots for nodes with pipe-separated parameters.
    Lists(Vec<Vec<NodeChild>>),
    /// A scalar tag name, magic word, or list prefix.
    Str(String),
}

impl Default for NodeArgs {
    fn default() -> Self {
        NodeArgs::Lists(Vec::new())
    }
}

impl NodeArgs {
    /// The argument slots, or an empty slice for scalar arguments.
    pub fn lists(&self) -> &[Vec<NodeChild>] {
        match self {
            NodeArgs::Lists(lists) => lists,
            NodeArgs::Str(_) => &[],
        }
    }

    /// The scalar argument, or an empty string for slot arguments.
    pub fn scalar(&self) -> &str {
        match self {
            NodeArgs::Str(text) => text,
            NodeArgs::Lists(_) => "",
        }
    }

    /// Appends an argument slot. A scalar argument is replaced by slots.
    pub(crate) fn push_list(&mut self, children: Vec<NodeChild>) {
        match self {
            NodeArgs::Lists(lists) => lists.push(children),
            NodeArgs::Str(_) => *self = NodeArgs::Lists(vec![children]),
        }
    }

    /// True when no arguments have been recorded.
    pub(crate) fn is_empty(&self) -> bool {
        match self {
            NodeArgs::Lists(lists) => lists.is_empty(),
            NodeArgs::Str(text) => text.is_empty(),
        }
    }
}

/// A node in the parse tree.
#[derive(Clone, Debug, PartialEq)]
pub struct WikiNode {
    /// The node type.
    pub kind: NodeKind,
    /// Arguments (pipe-separated slots, or a scalar token).
    pub args: NodeArgs,
    /// HTML attributes parsed from a start tag or table markup.
    pub attrs: HashMap<String, String>,
    /// Child content.
    pub children: Vec<NodeChild>,
    /// The definition of a definition list item (the part after `:`).
    pub definition: Option<Vec<NodeChild>>,
    /// Head content of a definition list item while it is being parsed; the
    /// pop handler swaps this into place.
    pub(crate) head: Option<Vec<NodeChild>>,
    /// The source line number, for error reports.
    pub loc: u32,
}

impl WikiNode {
    /// Creates an empty node of the given kind at the given source line.
    pub(crate) fn new(kind: NodeKind, loc: u32) -> Self {
        Self {
            kind,
            args: NodeArgs::default(),
            attrs: HashMap::new(),
            children: Vec::new(),
            definition: None,
            head: None,
            loc,
        }
    }
}

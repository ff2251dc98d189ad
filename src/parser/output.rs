//! Serializing parse trees back to wikitext, to HTML, and to plain text.

use super::{NodeArgs, NodeChild, NodeKind, WikiNode, html};
use crate::{Processor, expand::ExpandOptions, parserfns::quote_plus};
use regex::Regex;
use std::sync::LazyLock;

/// A hook that can replace the rendering of individual nodes. Returning
/// `None` renders the node normally.
pub type NodeHandlerFn<'a> = &'a dyn Fn(&WikiNode) -> Option<Vec<NodeChild>>;

/// Formats a node's attributes as HTML attribute text.
fn to_attrs(node: &WikiNode) -> String {
    let mut parts = Vec::with_capacity(node.attrs.len());
    for (name, value) in &node.attrs {
        if value.is_empty() {
            parts.push(name.clone());
        } else {
            parts.push(format!("{name}=\"{}\"", quote_plus(value)));
        }
    }
    parts.join(" ")
}

/// Converts a parse tree (or subtree) back to wikitext.
///
/// If `handler` is given, it is called for every node being rendered; a
/// non-`None` result is rendered in the node's place.
pub fn to_wikitext(node: &WikiNode, handler: Option<NodeHandlerFn<'_>>) -> String {
    let mut out = String::new();
    recurse_node(&mut out, node, handler);
    out
}

/// Renders a list of children.
fn recurse_children(out: &mut String, children: &[NodeChild], handler: Option<NodeHandlerFn<'_>>) {
    for child in children {
        recurse_child(out, child, handler);
    }
}

/// Renders one child.
fn recurse_child(out: &mut String, child: &NodeChild, handler: Option<NodeHandlerFn<'_>>) {
    match child {
        NodeChild::Text(text) => *out += text,
        NodeChild::Node(node) => recurse_node(out, node, handler),
    }
}

/// Renders argument slots joined with vertical bars.
fn recurse_args(out: &mut String, args: &NodeArgs, handler: Option<NodeHandlerFn<'_>>) {
    for (i, slot) in args.lists().iter().enumerate() {
        if i != 0 {
            out.push('|');
        }
        recurse_children(out, slot, handler);
    }
}

/// Renders one node.
fn recurse_node(out: &mut String, node: &WikiNode, handler: Option<NodeHandlerFn<'_>>) {
    let handler_opt = handler;
    if let Some(handler) = handler
        && let Some(replacement) = handler(node)
    {
        recurse_children(out, &replacement, handler_opt);
        return;
    }

    match node.kind {
        NodeKind::Root => recurse_children(out, &node.children, handler),
        NodeKind::Level2
        | NodeKind::Level3
        | NodeKind::Level4
        | NodeKind::Level5
        | NodeKind::Level6 => {
            let marker = "=".repeat(usize::from(node.kind.heading_level().unwrap_or(6)));
            out.push('\n');
            *out += &marker;
            out.push(' ');
            if let Some(title) = node.args.lists().first() {
                recurse_children(out, title, handler);
            }
            out.push(' ');
            *out += &marker;
            out.push('\n');
            recurse_children(out, &node.children, handler);
        }
        NodeKind::Hline => *out += "\n----\n",
        NodeKind::List => recurse_children(out, &node.children, handler),
        NodeKind::ListItem => {
            let prefix = node.args.scalar();
            *out += prefix;
            let mut prev_list = false;
            for child in &node.children {
                if prev_list {
                    *out += prefix;
                    out.push(':');
                }
                recurse_child(out, child, handler);
                prev_list =
                    matches!(child, NodeChild::Node(node) if node.kind == NodeKind::List);
            }
            if let Some(definition) = &node.definition {
                out.push(':');
                recurse_children(out, definition, handler);
            }
        }
        NodeKind::Pre => {
            *out += "<pre>";
            recurse_children(out, &node.children, handler);
            *out += "</pre>";
        }
        NodeKind::Preformatted => recurse_children(out, &node.children, handler),
        NodeKind::Link => {
            *out += "[[";
            recurse_args(out, &node.args, handler);
            *out += "]]";
            recurse_children(out, &node.children, handler);
        }
        NodeKind::Template => {
            *out += "{{";
            recurse_args(out, &node.args, handler);
            *out += "}}";
        }
        NodeKind::TemplateArg => {
            *out += "{{{";
            recurse_args(out, &node.args, handler);
            *out += "}}}";
        }
        NodeKind::ParserFn => {
            *out += "{{";
            if let Some(name) = node.args.lists().first() {
                recurse_children(out, name, handler);
            }
            out.push(':');
            for (i, slot) in node.args.lists().iter().skip(1).enumerate() {
                if i != 0 {
                    out.push('|');
                }
                recurse_children(out, slot, handler);
            }
            *out += "}}";
        }
        NodeKind::Url => {
            out.push('[');
            for (i, slot) in node.args.lists().iter().enumerate() {
                if i != 0 {
                    out.push(' ');
                }
                recurse_children(out, slot, handler);
            }
            out.push(']');
        }
        NodeKind::Table => {
            *out += "\n{| ";
            *out += &to_attrs(node);
            out.push('\n');
            recurse_children(out, &node.children, handler);
            *out += "\n|}\n";
        }
        NodeKind::TableCaption => {
            *out += "\n|+ ";
            *out += &to_attrs(node);
            out.push('\n');
            recurse_children(out, &node.children, handler);
        }
        NodeKind::TableRow => {
            *out += "\n|- ";
            *out += &to_attrs(node);
            out.push('\n');
            recurse_children(out, &node.children, handler);
        }
        NodeKind::TableHeaderCell => {
            if node.attrs.is_empty() {
                *out += "\n!";
            } else {
                *out += "\n! ";
                *out += &to_attrs(node);
                *out += " |";
            }
            recurse_children(out, &node.children, handler);
            out.push('\n');
        }
        NodeKind::TableCell => {
            if node.attrs.is_empty() {
                *out += "\n|";
            } else {
                *out += "\n| ";
                *out += &to_attrs(node);
                *out += " |";
            }
            recurse_children(out, &node.children, handler);
            out.push('\n');
        }
        NodeKind::MagicWord => {
            out.push('\n');
            *out += node.args.scalar();
            out.push('\n');
        }
        NodeKind::Html => {
            let name = node.args.scalar();
            if node.children.is_empty() {
                out.push('<');
                *out += name;
                if !node.attrs.is_empty() {
                    out.push(' ');
                    *out += &to_attrs(node);
                }
                if html::tag_spec(name).is_none_or(|spec| spec.no_end_tag) {
                    out.push('>');
                } else {
                    *out += " />";
                }
            } else {
                out.push('<');
                *out += name;
                if !node.attrs.is_empty() {
                    out.push(' ');
                    *out += &to_attrs(node);
                }
                out.push('>');
                recurse_children(out, &node.children, handler);
                *out += &format!("</{name}>");
            }
        }
        NodeKind::Bold => {
            *out += "'''";
            recurse_children(out, &node.children, handler);
            *out += "'''";
        }
        NodeKind::Italic => {
            *out += "''";
            recurse_children(out, &node.children, handler);
            *out += "''";
        }
    }
}

impl Processor {
    /// Converts a parse tree node back to wikitext.
    pub fn node_to_wikitext(
        &self,
        node: &WikiNode,
        handler: Option<NodeHandlerFn<'_>>,
    ) -> String {
        to_wikitext(node, handler)
    }

    /// Converts a parse tree node to HTML by serializing it to wikitext and
    /// expanding all templates in the result.
    pub fn node_to_html(
        &mut self,
        node: &WikiNode,
        options: &ExpandOptions<'_>,
        handler: Option<NodeHandlerFn<'_>>,
    ) -> String {
        let text = to_wikitext(node, handler);
        self.expand_with(&text, options)
    }

    /// Converts a parse tree node to plain text: HTML conversion followed by
    /// tag stripping.
    pub fn node_to_text(
        &mut self,
        node: &WikiNode,
        options: &ExpandOptions<'_>,
        handler: Option<NodeHandlerFn<'_>>,
    ) -> String {
        static REF: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"(?is)<\s*ref\s*[^>]*?>\s*.*?<\s*/\s*ref\s*>\n*").unwrap());
        static HEADING: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"(?is)<\s*/?\s*h[123456]\b[^>]*>\n*").unwrap());
        static DIV: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"(?is)<\s*/?\s*div\b[^>]*>\n*").unwrap());
        static BR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<\s*br\s*/?>\n*").unwrap());
        static HR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<\s*hr\s*/?>\n*").unwrap());
        static OPEN_TAG: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"(?s)<\s*[^/][^>]*>\s*").unwrap());
        static CLOSE_TAG: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"(?s)<\s*/\s*[^>]+>\n*").unwrap());
        static CATEGORY: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"(?s)\[\[\s*Category:[^\]<>]*\]\]").unwrap());
        static PIPED_LINK: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"(?s)\[\[(?:[^\]|<>]*?)\|([^\]]*?)\]\]").unwrap());
        static EXT_LINK: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"(?s)\[(?:https?:|mailto:)?//[^\]\s<>]+\s+([^\]]+)\]").unwrap()
        });
        static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\n\n+").unwrap());

        let text = self.node_to_html(node, options, handler);
        let text = REF.replace_all(&text, "");
        let text = HEADING.replace_all(&text, "\n\n");
        let text = DIV.replace_all(&text, "\n\n");
        let text = BR.replace_all(&text, "\n\n");
        let text = HR.replace_all(&text, "\n\n----\n\n");
        let text = OPEN_TAG.replace_all(&text, "");
        let text = CLOSE_TAG.replace_all(&text, "");
        let text = CATEGORY.replace_all(&text, "");
        let text = PIPED_LINK.replace_all(&text, "$1");
        let text = EXT_LINK.replace_all(&text, "$1");
        let text = BLANK_LINES.replace_all(&text, "\n\n");
        text.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ContentModel;

    #[test]
    fn serialized_templates_keep_their_surface_form() {
        let mut ctx = Processor::new().unwrap();
        ctx.start_page("Tt");
        let tree = ctx.parse("{{tmpl|a|b=c}} and {{{arg|def}}} and {{#if:x|y|z}}");
        let back = to_wikitext(&tree, None);
        assert_eq!(back, "{{tmpl|a|b=c}} and {{{arg|def}}} and {{#if:x|y|z}}");
    }

    #[test]
    fn plain_text_strips_markup() {
        let mut ctx = Processor::new().unwrap();
        ctx.add_page(ContentModel::Wikitext, "Template:b", "<b>{{{1}}}</b>").unwrap();
        ctx.start_page("Tt");
        let tree = ctx.parse("{{b|word}} and [[target|shown]]");
        let text = ctx.node_to_text(&tree, &ExpandOptions::default(), None);
        assert_eq!(text, "word and shown");
    }
}

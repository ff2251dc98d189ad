//! The project namespace table and title/template name canonicalisation.

use crate::{common::collapse_spaces, config::SiteConfig};
use std::borrow::Cow;

/// An article namespace.
#[derive(Debug, Eq)]
pub struct Namespace {
    /// The namespace ID.
    pub id: i32,
    /// The display name of the namespace.
    pub name: &'static str,
    /// The canonical name of the namespace.
    ///
    /// For example, the canonical 'Project' namespace, present on all MW
    /// installations, is normally given a display name matching the name of
    /// the wiki.
    pub canonical: &'static str,
    /// Named aliases for the namespace.
    pub aliases: &'static [&'static str],
    /// Whether pages within this namespace are subject (content) pages.
    pub subject: bool,
}

impl PartialEq for Namespace {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Namespace {
    /// The special namespace ID used for direct links to media files.
    pub const MEDIA: i32 = -2;
    /// The special namespace ID used for dynamic pages.
    pub const SPECIAL: i32 = -1;
    /// The main namespace ID.
    pub const MAIN: i32 = 0;
    /// The talk namespace ID.
    pub const TALK: i32 = 1;
    /// The template namespace ID.
    pub const TEMPLATE: i32 = 10;
    /// The module namespace ID.
    pub const MODULE: i32 = 828;

    /// Returns true if this is a talk namespace. Odd positive IDs are talk
    /// spaces.
    #[inline]
    pub const fn is_talk(&self) -> bool {
        self.id > Namespace::MAIN && self.id % 2 == 1
    }

    /// Returns the talk namespace ID for this namespace. If this namespace
    /// is a talk namespace, it is the same as this namespace ID.
    #[inline]
    pub const fn talk_id(&self) -> i32 {
        if self.is_talk() { self.id } else { self.id + 1 }
    }

    /// Returns the subject namespace ID for this namespace. If this namespace
    /// is a subject namespace, it is the same as this namespace ID.
    #[inline]
    pub const fn subject_id(&self) -> i32 {
        if self.is_talk() { self.id - 1 } else { self.id }
    }

    /// Finds a namespace by its ID.
    pub fn find_by_id(id: i32) -> Option<&'static Namespace> {
        NAMESPACES.iter().find(|ns| ns.id == id)
    }

    /// Finds a namespace by any of its names, case-insensitively. Underscores
    /// in `name` are treated as spaces. Extra per-project aliases from the
    /// configuration are consulted after the built-in table.
    pub fn find_by_name(name: &str, config: &SiteConfig) -> Option<&'static Namespace> {
        let name = name.replace('_', " ");
        let name = name.trim();
        let matches = |candidate: &str| candidate.eq_ignore_ascii_case(name);
        NAMESPACES
            .iter()
            .find(|ns| {
                matches(ns.name)
                    || matches(ns.canonical)
                    || ns.aliases.iter().any(|alias| matches(alias))
            })
            .or_else(|| {
                config
                    .namespace_aliases
                    .iter()
                    .find(|(alias, _)| matches(alias))
                    .and_then(|(_, id)| Namespace::find_by_id(*id))
            })
    }
}

/// The built-in namespace table. Projects rename some of these (via
/// [`SiteConfig::namespace_aliases`]), but the IDs and canonical names are
/// fixed across MediaWiki installations.
pub static NAMESPACES: &[Namespace] = &[
    Namespace { id: -2, name: "Media", canonical: "Media", aliases: &[], subject: true },
    Namespace { id: -1, name: "Special", canonical: "Special", aliases: &[], subject: true },
    Namespace { id: 0, name: "", canonical: "", aliases: &["Main"], subject: true },
    Namespace { id: 1, name: "Talk", canonical: "Talk", aliases: &[], subject: false },
    Namespace { id: 2, name: "User", canonical: "User", aliases: &[], subject: true },
    Namespace { id: 3, name: "User talk", canonical: "User talk", aliases: &[], subject: false },
    Namespace { id: 4, name: "Project", canonical: "Project", aliases: &["WP"], subject: true },
    Namespace {
        id: 5,
        name: "Project talk",
        canonical: "Project talk",
        aliases: &[],
        subject: false,
    },
    Namespace { id: 6, name: "File", canonical: "File", aliases: &["Image"], subject: true },
    Namespace {
        id: 7,
        name: "File talk",
        canonical: "File talk",
        aliases: &["Image talk"],
        subject: false,
    },
    Namespace { id: 8, name: "MediaWiki", canonical: "MediaWiki", aliases: &[], subject: true },
    Namespace {
        id: 9,
        name: "MediaWiki talk",
        canonical: "MediaWiki talk",
        aliases: &[],
        subject: false,
    },
    Namespace { id: 10, name: "Template", canonical: "Template", aliases: &["T"], subject: true },
    Namespace {
        id: 11,
        name: "Template talk",
        canonical: "Template talk",
        aliases: &[],
        subject: false,
    },
    Namespace { id: 12, name: "Help", canonical: "Help", aliases: &[], subject: true },
    Namespace { id: 13, name: "Help talk", canonical: "Help talk", aliases: &[], subject: false },
    Namespace { id: 14, name: "Category", canonical: "Category", aliases: &[], subject: true },
    Namespace {
        id: 15,
        name: "Category talk",
        canonical: "Category talk",
        aliases: &[],
        subject: false,
    },
    Namespace { id: 828, name: "Module", canonical: "Module", aliases: &[], subject: true },
    Namespace {
        id: 829,
        name: "Module talk",
        canonical: "Module talk",
        aliases: &[],
        subject: false,
    },
];

/// Returns the namespace ID for a full page title, derived from its prefix.
pub fn namespace_of(title: &str, config: &SiteConfig) -> i32 {
    title
        .split_once(':')
        .and_then(|(prefix, _)| Namespace::find_by_name(prefix, config))
        .map_or(Namespace::MAIN, |ns| ns.id)
}

/// Canonicalises a template name.
///
/// The namespace prefix is stripped case-insensitively, underscores become
/// spaces, whitespace runs collapse to a single space, `( ) & +` are
/// percent-escaped, and the result is trimmed. Whether the first letter is
/// upcased is a per-project policy bit.
pub fn canonicalize_template_name(name: &str, config: &SiteConfig) -> String {
    let name = name.trim();
    let name = name
        .split_once(':')
        .filter(|(prefix, _)| prefix.trim().eq_ignore_ascii_case("template"))
        .map_or(name, |(_, rest)| rest);
    let name = name.replace('_', " ");
    let name = collapse_spaces(&name);
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '(' => out += "%28",
            ')' => out += "%29",
            '&' => out += "%26",
            '+' => out += "%2B",
            c => out.push(c),
        }
    }
    if config.capitalize_first {
        crate::common::capitalize_first(&out).into_owned()
    } else {
        out
    }
}

/// Prefixes a name with `Template:` unless it already carries a known
/// namespace prefix.
pub(crate) fn qualify_template_title<'a>(name: &'a str, config: &SiteConfig) -> Cow<'a, str> {
    if name
        .split_once(':')
        .is_some_and(|(prefix, _)| Namespace::find_by_name(prefix, config).is_some())
    {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("Template:{name}"))
    }
}

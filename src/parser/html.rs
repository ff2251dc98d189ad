//! The HTML tag allow-list.
//!
//! Wikitext permits a closed subset of HTML. Each entry records the
//! permitted parents and content of the tag (in terms of the HTML content
//! categories or specific tag names), whether the tag takes no end tag, and
//! which sibling tags implicitly close it.

use std::{
    collections::{HashMap, HashSet},
    sync::LazyLock,
};

/// The allow-list entry for one tag.
pub(crate) struct TagSpec {
    /// Permitted parent categories (`flow`, `phrasing`, `*`) or tag names.
    pub parents: &'static [&'static str],
    /// Permitted content categories or tag names.
    pub content: &'static [&'static str],
    /// The tag takes no end tag (`<br>`, `<hr>`, `<wbr>`).
    pub no_end_tag: bool,
    /// Opening one of these siblings implicitly closes this tag.
    pub close_next: &'static [&'static str],
}

/// Shorthand for a phrasing-level tag.
const fn phrasing() -> TagSpec {
    TagSpec { parents: &["phrasing"], content: &["phrasing"], no_end_tag: false, close_next: &[] }
}

/// Shorthand for a flow-level container tag.
const fn flow() -> TagSpec {
    TagSpec { parents: &["flow"], content: &["flow"], no_end_tag: false, close_next: &[] }
}

/// The allow-list. Tags not listed here survive as literal text.
pub(crate) static ALLOWED_HTML_TAGS: phf::Map<&'static str, TagSpec> = phf::phf_map! {
    "abbr" => phrasing(),
    "b" => phrasing(),
    "bdi" => phrasing(),
    "bdo" => phrasing(),
    "big" => phrasing(),
    "blockquote" => flow(),
    "br" => TagSpec {
        parents: &["phrasing"],
        content: &[],
        no_end_tag: true,
        close_next: &[],
    },
    "caption" => TagSpec {
        parents: &["table"],
        content: &["flow"],
        no_end_tag: false,
        close_next: &[],
    },
    "center" => flow(),
    "chem" => TagSpec {
        parents: &["phrasing"],
        content: &["*"],
        no_end_tag: false,
        close_next: &[],
    },
    "cite" => phrasing(),
    "code" => phrasing(),
    "data" => phrasing(),
    "dd" => TagSpec {
        parents: &["dl"],
        content: &["flow"],
        no_end_tag: false,
        close_next: &["dd", "dt"],
    },
    "del" => phrasing(),
    "dfn" => phrasing(),
    "div" => flow(),
    "dl" => TagSpec {
        parents: &["flow"],
        content: &["dd", "dt"],
        no_end_tag: false,
        close_next: &[],
    },
    "dt" => TagSpec {
        parents: &["dl"],
        content: &["flow"],
        no_end_tag: false,
        close_next: &["dd", "dt"],
    },
    "em" => phrasing(),
    "font" => phrasing(),
    "gallery" => TagSpec {
        parents: &["flow"],
        content: &["*"],
        no_end_tag: false,
        close_next: &[],
    },
    "h1" => TagSpec {
        parents: &["flow"],
        content: &["phrasing"],
        no_end_tag: false,
        close_next: &[],
    },
    "h2" => TagSpec {
        parents: &["flow"],
        content: &["phrasing"],
        no_end_tag: false,
        close_next: &[],
    },
    "h3" => TagSpec {
        parents: &["flow"],
        content: &["phrasing"],
        no_end_tag: false,
        close_next: &[],
    },
    "h4" => TagSpec {
        parents: &["flow"],
        content: &["phrasing"],
        no_end_tag: false,
        close_next: &[],
    },
    "h5" => TagSpec {
        parents: &["flow"],
        content: &["phrasing"],
        no_end_tag: false,
        close_next: &[],
    },
    "h6" => TagSpec {
        parents: &["flow"],
        content: &["phrasing"],
        no_end_tag: false,
        close_next: &[],
    },
    "hr" => TagSpec {
        parents: &["flow"],
        content: &[],
        no_end_tag: true,
        close_next: &[],
    },
    "i" => phrasing(),
    "includeonly" => TagSpec {
        parents: &["*"],
        content: &["*"],
        no_end_tag: false,
        close_next: &[],
    },
    "ins" => phrasing(),
    "kbd" => phrasing(),
    "li" => TagSpec {
        parents: &["ol", "ul"],
        content: &["flow"],
        no_end_tag: false,
        close_next: &["li"],
    },
    "mark" => phrasing(),
    "math" => TagSpec {
        parents: &["phrasing"],
        content: &["*"],
        no_end_tag: false,
        close_next: &[],
    },
    "noinclude" => TagSpec {
        parents: &["*"],
        content: &["*"],
        no_end_tag: false,
        close_next: &[],
    },
    "ol" => TagSpec {
        parents: &["flow"],
        content: &["li"],
        no_end_tag: false,
        close_next: &[],
    },
    "onlyinclude" => TagSpec {
        parents: &["*"],
        content: &["*"],
        no_end_tag: false,
        close_next: &[],
    },
    "p" => TagSpec {
        parents: &["flow"],
        content: &["phrasing"],
        no_end_tag: false,
        close_next: &["p"],
    },
    "pre" => TagSpec {
        parents: &["flow"],
        content: &["phrasing"],
        no_end_tag: false,
        close_next: &[],
    },
    "q" => phrasing(),
    "rb" => TagSpec {
        parents: &["ruby"],
        content: &["phrasing"],
        no_end_tag: false,
        close_next: &["rb", "rp", "rt", "rtc"],
    },
    "ref" => TagSpec {
        parents: &["phrasing"],
        content: &["flow"],
        no_end_tag: false,
        close_next: &[],
    },
    "references" => TagSpec {
        parents: &["flow"],
        content: &["*"],
        no_end_tag: false,
        close_next: &[],
    },
    "rp" => TagSpec {
        parents: &["ruby"],
        content: &["phrasing"],
        no_end_tag: false,
        close_next: &["rb", "rp", "rt", "rtc"],
    },
    "rt" => TagSpec {
        parents: &["ruby"],
        content: &["phrasing"],
        no_end_tag: false,
        close_next: &["rb", "rp", "rt", "rtc"],
    },
    "rtc" => TagSpec {
        parents: &["ruby"],
        content: &["phrasing"],
        no_end_tag: false,
        close_next: &["rb", "rp", "rt", "rtc"],
    },
    "ruby" => TagSpec {
        parents: &["phrasing"],
        content: &["rb", "rp", "rt", "rtc"],
        no_end_tag: false,
        close_next: &[],
    },
    "s" => phrasing(),
    "samp" => phrasing(),
    "small" => phrasing(),
    "span" => phrasing(),
    "strike" => phrasing(),
    "strong" => phrasing(),
    "sub" => phrasing(),
    "sup" => phrasing(),
    "table" => TagSpec {
        parents: &["flow"],
        content: &["caption", "tbody", "tfoot", "thead", "tr"],
        no_end_tag: false,
        close_next: &[],
    },
    "tbody" => TagSpec {
        parents: &["table"],
        content: &["tr"],
        no_end_tag: false,
        close_next: &["tbody", "tfoot"],
    },
    "td" => TagSpec {
        parents: &["tr"],
        content: &["flow"],
        no_end_tag: false,
        close_next: &["td", "th"],
    },
    "tfoot" => TagSpec {
        parents: &["table"],
        content: &["tr"],
        no_end_tag: false,
        close_next: &[],
    },
    "th" => TagSpec {
        parents: &["tr"],
        content: &["flow"],
        no_end_tag: false,
        close_next: &["td", "th"],
    },
    "thead" => TagSpec {
        parents: &["table"],
        content: &["tr"],
        no_end_tag: false,
        close_next: &["tbody"],
    },
    "time" => phrasing(),
    "tr" => TagSpec {
        parents: &["table", "tbody", "tfoot", "thead"],
        content: &["td", "th"],
        no_end_tag: false,
        close_next: &["tr"],
    },
    "tt" => phrasing(),
    "u" => phrasing(),
    "ul" => TagSpec {
        parents: &["flow"],
        content: &["li"],
        no_end_tag: false,
        close_next: &[],
    },
    "var" => phrasing(),
    "wbr" => TagSpec {
        parents: &["phrasing"],
        content: &[],
        no_end_tag: true,
        close_next: &[],
    },
};

/// Returns true if the tag is on the allow-list.
pub(crate) fn is_allowed(tag: &str) -> bool {
    ALLOWED_HTML_TAGS.contains_key(tag)
}

/// Returns the spec for an allowed tag.
pub(crate) fn tag_spec(tag: &str) -> Option<&'static TagSpec> {
    ALLOWED_HTML_TAGS.get(tag)
}

/// Iterates over the tags that require an explicit end tag.
pub(crate) fn paired_tags() -> impl Iterator<Item = &'static str> {
    ALLOWED_HTML_TAGS
        .entries()
        .filter(|(_, spec)| !spec.no_end_tag)
        .map(|(name, _)| *name)
}

/// Tags that may contain flow content.
static FLOW_PARENTS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    ALLOWED_HTML_TAGS
        .entries()
        .filter(|(_, spec)| {
            spec.content.contains(&"flow") || spec.content.contains(&"*")
        })
        .map(|(name, _)| *name)
        .collect()
});

/// Tags that may contain phrasing content (flow implies phrasing).
static PHRASING_PARENTS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    ALLOWED_HTML_TAGS
        .entries()
        .filter(|(_, spec)| {
            spec.content.contains(&"phrasing")
                || spec.content.contains(&"flow")
                || spec.content.contains(&"*")
        })
        .map(|(name, _)| *name)
        .collect()
});

/// The permitted parent tags of each allowed tag.
static PERMITTED_PARENTS: LazyLock<HashMap<&'static str, HashSet<&'static str>>> =
    LazyLock::new(|| {
        ALLOWED_HTML_TAGS
            .entries()
            .map(|(name, spec)| {
                let mut parents = HashSet::new();
                if spec.parents.contains(&"flow") || spec.parents.contains(&"*") {
                    parents.extend(FLOW_PARENTS.iter().copied());
                }
                if spec.parents.contains(&"phrasing") || spec.parents.contains(&"*") {
                    parents.extend(PHRASING_PARENTS.iter().copied());
                }
                for parent in spec.parents {
                    if !matches!(*parent, "flow" | "phrasing" | "*") {
                        parents.insert(*parent);
                    }
                }
                (*name, parents)
            })
            .collect()
    });

/// Returns the permitted parent tags of `tag`, or an empty set for unknown
/// tags.
pub(crate) fn permitted_parents(tag: &str) -> &'static HashSet<&'static str> {
    static EMPTY: LazyLock<HashSet<&'static str>> = LazyLock::new(HashSet::new);
    PERMITTED_PARENTS.get(tag).unwrap_or(&EMPTY)
}

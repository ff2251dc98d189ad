//! Template analysis.
//!
//! Some templates emit tokens the structural parser must see directly —
//! list prefixes, table openers, bare cell markers, unbalanced HTML. Those
//! must be expanded before parsing, and the flag propagates to every
//! template that transcludes them.

use crate::{Processor, parser::html, title::canonicalize_template_name};
use regex::Regex;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, LazyLock},
};

/// A paired table, which neutralizes the table tokens inside it.
static PAIRED_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(^|\n)\{\|([^\n]|\n+[^{|]|\n+\|[^}]|\n+\{[^|])*?\n+\|\}").unwrap()
});

/// A table opener or closer at the start of a line.
static UNPAIRED_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(^|\n)(\{\||\|\})").unwrap());

/// A template argument reference, for elimination.
static ARG_ELIM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{\{([^{}]|\}[^}]|\}\}[^}])*?\}\}\}").unwrap());

/// A template call, for elimination.
static TEMPLATE_ELIM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{([^{}]|\}[^}])*?\}\}").unwrap());

/// A bare table caption, row, or header token at the start of a line.
static TABLE_ELEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(^|\n)(\|\+|\|-|!)").unwrap());

/// An open or close tag of any paired HTML tag from the allow-list.
static PAIRED_TAG: LazyLock<Regex> = LazyLock::new(|| {
    let names = html::paired_tags().collect::<Vec<_>>().join("|");
    Regex::new(&format!(r"(?si)<\s*(/\s*)?({names})\b\s*[^>]*?(/\s*)?>")).unwrap()
});

/// A template transclusion inside unpaired text, for dependency scanning.
static INCLUSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(^|[^{])(\{\{)?\{\{([^{]*?)(\||\}\})").unwrap());

/// A self-closing nowiki inside a transcluded name.
static NOWIKI_SELF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?si)<\s*nowiki\s*/\s*>").unwrap());

/// The per-template analysis result.
struct Analysis {
    /// Canonical names of templates transcluded from unpaired text.
    included: HashSet<String>,
    /// Whether this template must be expanded before parsing.
    pre_expand: bool,
}

/// Classifies one template body. The flag is decided from this body alone;
/// the caller propagates it through the inclusion graph. Calls whose name is
/// generated by other expansions cannot be seen here.
fn analyze_template(body: &str, config: &crate::config::SiteConfig) -> Analysis {
    let contains_list = body.starts_with(['#', '*', ';', ':']);

    // Remove paired tables so their internal tokens do not count
    let mut unpaired = body.to_string();
    loop {
        let next = PAIRED_TABLE.replace_all(&unpaired, "$1").into_owned();
        if next == unpaired {
            break;
        }
        unpaired = next;
    }

    let contains_unpaired_table = UNPAIRED_TABLE.is_match(&unpaired);

    // Table element tokens only count outside templates; argument pipes are
    // routinely written at the start of a line.
    let mut outside = unpaired.clone();
    loop {
        let prev = outside.clone();
        let mut next = outside;
        loop {
            let elim = ARG_ELIM.replace_all(&next, "").into_owned();
            if elim == next {
                break;
            }
            next = elim;
        }
        next = TEMPLATE_ELIM.replace_all(&next, "").into_owned();
        if next == prev {
            outside = next;
            break;
        }
        outside = next;
    }

    let contains_table_element = TABLE_ELEMENT.is_match(&outside);

    // Count open vs close of each paired tag
    let mut tag_counts: HashMap<String, i32> = HashMap::new();
    for caps in PAIRED_TAG.captures_iter(&outside) {
        let closing = caps.get(1).is_some();
        let self_closing = caps.get(3).is_some();
        let name = caps[2].to_lowercase();
        if closing {
            *tag_counts.entry(name).or_default() -= 1;
        } else if !self_closing {
            *tag_counts.entry(name).or_default() += 1;
        }
    }
    let contains_unbalanced_html = tag_counts.values().any(|&count| count != 0);

    let mut included = HashSet::new();
    for caps in INCLUSION.captures_iter(&unpaired) {
        let name = NOWIKI_SELF.replace_all(&caps[3], "");
        let name = canonicalize_template_name(&name, config);
        if !name.is_empty() {
            included.insert(name);
        }
    }

    Analysis {
        included,
        pre_expand: contains_list
            || contains_unpaired_table
            || contains_table_element
            || contains_unbalanced_html,
    }
}

impl Processor {
    /// Analyzes all stored templates, marking those that must be expanded
    /// before parsing and propagating the flag through the inclusion graph
    /// to a fixed point. Redirect pages inherit the target's body and flag.
    pub fn analyze_templates(&mut self) {
        let mut need: HashSet<String> = HashSet::new();
        let mut included_map: HashMap<String, HashSet<String>> = HashMap::new();
        let mut queue: Vec<String> = Vec::new();

        for (name, body) in self.templates.iter() {
            let analysis = analyze_template(body, &self.config);
            for inc in analysis.included {
                included_map.entry(inc).or_default().insert(name.clone());
            }
            if analysis.pre_expand {
                need.insert(name.clone());
                queue.push(name.clone());
            }
        }

        // Propagate from used templates to their users
        while let Some(name) = queue.pop() {
            let Some(users) = included_map.get(&name) else {
                continue;
            };
            for user in users {
                if need.insert(user.clone()) {
                    queue.push(user.clone());
                }
            }
        }

        // Copy template definitions to the redirects pointing at them
        let redirects: Vec<(String, String)> = self
            .store
            .redirects()
            .iter()
            .filter(|(from, to)| {
                from.starts_with("Template:") && to.starts_with("Template:")
            })
            .map(|(from, to)| {
                (
                    canonicalize_template_name(from, &self.config),
                    canonicalize_template_name(to, &self.config),
                )
            })
            .collect();
        for (from, to) in redirects {
            if self.templates.contains_key(&from) {
                continue;
            }
            let Some(body) = self.templates.get(&to).cloned() else {
                continue;
            };
            Arc::make_mut(&mut self.templates).insert(from.clone(), body);
            if need.contains(&to) {
                need.insert(from);
            }
        }

        self.need_pre_expand = Some(Arc::new(need));
        self.needs_reanalysis = false;
    }
}

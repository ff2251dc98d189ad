//! Per-project configuration.

/// Project-level settings that vary between MediaWiki installations.
///
/// The defaults describe an English-Wiktionary-like project, which is what
/// the bundled parser function implementations assume when no configuration
/// is given.
#[derive(Clone, Debug)]
pub struct SiteConfig {
    /// The display name of the project, returned by the `Project` namespace
    /// and `{{ns:Project}}`.
    pub project_name: String,
    /// The host name used when building `fullurl:`/`SERVER` values.
    pub server_name: String,
    /// Whether the leading character of template names is upcased during
    /// canonicalisation. MediaWiki proper does this on most projects, but
    /// several Wiktionaries are configured case-sensitive.
    pub capitalize_first: bool,
    /// Extra namespace aliases beyond the built-in table, as
    /// `(alias, namespace id)` pairs. The French Wiktionary, for example,
    /// aliases "Annexe" for its appendix namespace.
    pub namespace_aliases: Vec<(String, i32)>,
    /// Known interwiki prefixes mapped to their base URLs. Unknown prefixes
    /// stay in the title path when building URLs.
    pub interwiki: Vec<(String, String)>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            project_name: "Wiktionary".to_string(),
            server_name: "dummy.host".to_string(),
            capitalize_first: false,
            namespace_aliases: Vec::new(),
            interwiki: vec![
                ("w".to_string(), "//en.wikipedia.org/wiki/".to_string()),
                ("wikipedia".to_string(), "//en.wikipedia.org/wiki/".to_string()),
                ("commons".to_string(), "//commons.wikimedia.org/wiki/".to_string()),
                ("wikt".to_string(), "//en.wiktionary.org/wiki/".to_string()),
                ("s".to_string(), "//en.wikisource.org/wiki/".to_string()),
            ],
        }
    }
}

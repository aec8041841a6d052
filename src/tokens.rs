//! Identifier tokenization and naming-convention variants
//!
//! Identifiers are split on camel-case boundaries, underscores and hyphens.
//! The resulting words drive two strategies outside the fast cascade:
//! token-fuzzy search (`get.*user.*name`) and semantic variants (the same
//! words in other naming conventions, plus verb synonyms such as
//! `fetchUserName` for `getUserName`).

use serde::Serialize;

/// Words dropped by [`tokenize`]: articles, connectives and common keywords
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "of", "to", "in", "on", "at", "by", "for", "and", "or", "is", "as", "fn",
    "func", "function", "def", "class", "struct", "enum", "impl", "trait", "interface", "const",
    "let", "var", "mut", "pub", "new", "return", "if", "else", "async", "await", "self", "this",
];

/// Verbs that commonly stand in for one another in identifiers
const VERB_SYNONYMS: &[&[&str]] = &[
    &["get", "fetch", "retrieve", "load", "obtain", "find", "read"],
    &["set", "update", "assign", "write", "store", "save", "put"],
    &["create", "make", "build", "generate", "construct", "spawn"],
    &["delete", "remove", "destroy", "erase", "drop", "clear"],
    &["check", "validate", "verify", "ensure", "assert"],
    &["init", "initialize", "setup", "start", "boot"],
    &["handle", "process", "manage", "dispatch"],
    &["send", "emit", "publish", "notify", "post"],
    &["parse", "decode", "deserialize", "read"],
    &["format", "encode", "serialize", "render"],
    &["search", "find", "lookup", "query"],
    &["stop", "halt", "end", "finish", "close"],
];

/// Upper bound on generated semantic variants per identifier
const MAX_VARIANTS: usize = 16;

/// Naming convention of an identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingConvention {
    /// `getUserName`
    CamelCase,
    /// `GetUserName`
    PascalCase,
    /// `get_user_name`
    SnakeCase,
    /// `GET_USER_NAME`
    ScreamingSnakeCase,
    /// `get-user-name`
    KebabCase,
    /// Single lowercase word, or mixed separators
    Unknown,
}

impl NamingConvention {
    pub const ALL: [NamingConvention; 5] = [
        NamingConvention::CamelCase,
        NamingConvention::PascalCase,
        NamingConvention::SnakeCase,
        NamingConvention::ScreamingSnakeCase,
        NamingConvention::KebabCase,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NamingConvention::CamelCase => "camelCase",
            NamingConvention::PascalCase => "PascalCase",
            NamingConvention::SnakeCase => "snake_case",
            NamingConvention::ScreamingSnakeCase => "SCREAMING_SNAKE_CASE",
            NamingConvention::KebabCase => "kebab-case",
            NamingConvention::Unknown => "unknown",
        }
    }

    /// Classify an identifier
    pub fn classify(identifier: &str) -> Self {
        let has_lower = identifier.chars().any(|c| c.is_lowercase());
        let has_upper = identifier.chars().any(|c| c.is_uppercase());
        let has_underscore = identifier.contains('_');
        let has_hyphen = identifier.contains('-');

        match (has_underscore, has_hyphen) {
            (true, true) => NamingConvention::Unknown,
            (false, true) if !has_upper => NamingConvention::KebabCase,
            (false, true) => NamingConvention::Unknown,
            (true, false) if !has_lower && has_upper => NamingConvention::ScreamingSnakeCase,
            (true, false) if !has_upper => NamingConvention::SnakeCase,
            (true, false) => NamingConvention::Unknown,
            (false, false) => {
                let first_upper = identifier.chars().next().is_some_and(|c| c.is_uppercase());
                match (first_upper, has_lower, has_upper) {
                    (true, true, _) => NamingConvention::PascalCase,
                    (false, true, true) => NamingConvention::CamelCase,
                    _ => NamingConvention::Unknown,
                }
            }
        }
    }

    /// Join words in this convention; `Unknown` behaves like camelCase
    pub fn join(&self, words: &[String]) -> String {
        let lower: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
        match self {
            NamingConvention::SnakeCase => lower.join("_"),
            NamingConvention::KebabCase => lower.join("-"),
            NamingConvention::ScreamingSnakeCase => lower.join("_").to_uppercase(),
            NamingConvention::PascalCase => lower.iter().map(|w| capitalize(w)).collect(),
            NamingConvention::CamelCase | NamingConvention::Unknown => lower
                .iter()
                .enumerate()
                .map(|(i, w)| if i == 0 { w.clone() } else { capitalize(w) })
                .collect(),
        }
    }
}

impl std::fmt::Display for NamingConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Split an identifier into its words, preserving case.
///
/// `parseHTTPResponse` → `parse`, `HTTP`, `Response`;
/// `user_id-v2` → `user`, `id`, `v2`.
pub fn split_words(identifier: &str) -> Vec<String> {
    let mut words = Vec::new();
    for part in identifier.split(|c: char| !c.is_alphanumeric()) {
        let chars: Vec<char> = part.chars().collect();
        let mut current = String::new();
        for (i, &c) in chars.iter().enumerate() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if c.is_uppercase() => {
                    // fooBar | HTTPServer (the S starts a new word)
                    p.is_lowercase()
                        || p.is_ascii_digit()
                        || (p.is_uppercase() && next.is_some_and(|n| n.is_lowercase()))
                }
                _ => false,
            };
            if boundary && !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            current.push(c);
        }
        if !current.is_empty() {
            words.push(current);
        }
    }
    words
}

/// Lower-cased words of an identifier with stop words removed
pub fn tokenize(identifier: &str) -> Vec<String> {
    split_words(identifier)
        .into_iter()
        .map(|w| w.to_lowercase())
        .filter(|w| !is_stop_word(w))
        .collect()
}

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Synonyms of a verb, excluding the verb itself
pub fn verb_synonyms(verb: &str) -> Vec<&'static str> {
    let verb = verb.to_lowercase();
    let mut synonyms: Vec<&'static str> = Vec::new();
    for group in VERB_SYNONYMS.iter().filter(|g| g.contains(&verb.as_str())) {
        for &word in group.iter() {
            if word != verb && !synonyms.contains(&word) {
                synonyms.push(word);
            }
        }
    }
    synonyms
}

/// Alternative spellings of an identifier worth searching for.
///
/// The identifier's words in every other naming convention, followed by
/// leading-verb synonyms in the identifier's own convention. The identifier
/// itself is never included.
pub fn semantic_variants(identifier: &str) -> Vec<String> {
    let words = split_words(identifier);
    if words.is_empty() {
        return Vec::new();
    }
    let convention = NamingConvention::classify(identifier);
    let mut variants: Vec<String> = Vec::new();
    let mut push = |candidate: String| {
        if candidate != identifier && !variants.contains(&candidate) {
            variants.push(candidate);
        }
    };

    if words.len() > 1 {
        for other in NamingConvention::ALL {
            if other != convention {
                push(other.join(&words));
            }
        }
    }

    for synonym in verb_synonyms(&words[0]) {
        let mut swapped = words.clone();
        swapped[0] = synonym.to_string();
        push(convention.join(&swapped));
    }

    variants.truncate(MAX_VARIANTS);
    variants
}

/// Everything known about an identifier's shape, for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifierAnalysis {
    pub identifier: String,
    pub convention: NamingConvention,
    pub words: Vec<String>,
    pub tokens: Vec<String>,
    pub variants: Vec<String>,
}

impl IdentifierAnalysis {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            convention: NamingConvention::classify(identifier),
            words: split_words(identifier),
            tokens: tokenize(identifier),
            variants: semantic_variants(identifier),
        }
    }
}

//! Instance paths into the configuration tree.
//!
//! An instance path looks like
//! `/openconfig-interfaces:interfaces/interface[name=Ethernet0]/config/mtu`.
//! Each component is a schema node name, optionally followed by list key
//! predicates. Predicate values may contain `/`; a literal `]` or `\` inside a
//! value is escaped with a backslash.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

/// Errors related to path parsing and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// A path component is malformed.
    InvalidComponent {
        component: String,
        position: usize,
        message: String,
    },
    /// The path string is invalid.
    InvalidPath { message: String },
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::InvalidComponent {
                component,
                position,
                message,
            } => {
                write!(
                    f,
                    "invalid path component '{}' at position {}: {}",
                    component, position, message
                )
            }
            PathError::InvalidPath { message } => {
                write!(f, "invalid path: {}", message)
            }
        }
    }
}

impl std::error::Error for PathError {}

/// Strip a `module:` prefix from a node name.
pub fn local_name(name: &str) -> &str {
    match name.split_once(':') {
        Some((_, local)) => local,
        None => name,
    }
}

/// One step of an instance path.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Component {
    pub name: String,
    /// Key predicates in the order they were written.
    pub keys: Vec<(String, String)>,
}

impl Component {
    pub fn new(name: impl Into<String>) -> Self {
        Component {
            name: name.into(),
            keys: Vec::new(),
        }
    }

    pub fn key(&self, name: &str) -> Option<&str> {
        self.keys
            .iter()
            .find(|(k, _)| k == name || local_name(k) == name)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (k, v) in &self.keys {
            let escaped = v.replace('\\', "\\\\").replace(']', "\\]");
            write!(f, "[{}={}]", k, escaped)?;
        }
        Ok(())
    }
}

/// A parsed instance path.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Path {
    pub components: Vec<Component>,
}

#[macro_export]
macro_rules! path {
    ($path_string:expr) => {
        $crate::Path::parse($path_string).unwrap()
    };
    ($($args:tt),*) => {
        compile_error!("Expected 1 argument, got something else")
    };
}

impl Path {
    /// Parse an instance path string.
    ///
    /// Empty components are ignored, so `//a/b/` and `/a/b` are the same path.
    ///
    /// ```rust
    /// use xlate_core::Path;
    ///
    /// let p = Path::parse("/acl/acl-sets/acl-set[name=A1][type=ACL_IPV4]").unwrap();
    /// assert_eq!(p.len(), 3);
    /// assert_eq!(p.components[2].key("type"), Some("ACL_IPV4"));
    /// ```
    pub fn parse(s: &str) -> Result<Self, PathError> {
        let raw = split_components(s)?;
        let mut components = Vec::with_capacity(raw.len());
        for (position, text) in raw.iter().enumerate() {
            components.push(parse_component(text, position)?);
        }
        Ok(Path { components })
    }

    pub fn root() -> Self {
        Path::default()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.iter()
    }

    pub fn last(&self) -> Option<&Component> {
        self.components.last()
    }

    pub fn last_name(&self) -> Option<&str> {
        self.last().map(|c| c.name.as_str())
    }

    /// The path with every key predicate removed. This is the key under
    /// which schema nodes are indexed.
    pub fn schema_path(&self) -> String {
        let mut out = String::new();
        for c in &self.components {
            out.push('/');
            out.push_str(&c.name);
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }

    /// True when the last component carries key predicates (a list instance).
    pub fn ends_with_keys(&self) -> bool {
        self.last().is_some_and(|c| !c.keys.is_empty())
    }

    #[must_use]
    pub fn parent(&self) -> Option<Path> {
        if self.is_empty() {
            return None;
        }
        Some(self.prefix(self.len() - 1))
    }

    /// The first `len` components.
    #[must_use]
    pub fn prefix(&self, len: usize) -> Path {
        Path {
            components: self.components[..len.min(self.len())].to_vec(),
        }
    }

    #[must_use]
    pub fn child(&self, name: &str) -> Path {
        self.child_with_keys(name, Vec::new())
    }

    #[must_use]
    pub fn child_with_keys(&self, name: &str, keys: Vec<(String, String)>) -> Path {
        let mut components = self.components.clone();
        components.push(Component {
            name: name.to_string(),
            keys,
        });
        Path { components }
    }

    /// Same path with the key predicates of the last component dropped.
    #[must_use]
    pub fn without_last_keys(&self) -> Path {
        let mut p = self.clone();
        if let Some(last) = p.components.last_mut() {
            last.keys.clear();
        }
        p
    }

    pub fn has_prefix(&self, prefix: &Path) -> bool {
        prefix.len() <= self.len() && prefix.components == self.components[..prefix.len()]
    }

    /// Look up the nearest key predicate with this name, searching from the
    /// end of the path.
    pub fn key_value(&self, key: &str) -> Option<&str> {
        self.components.iter().rev().find_map(|c| c.key(key))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "/");
        }
        for c in &self.components {
            write!(f, "/{}", c)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

fn split_components(s: &str) -> Result<Vec<String>, PathError> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_predicate = false;
    let mut escaped = false;

    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_predicate => {
                current.push(c);
                escaped = true;
            }
            '[' if !in_predicate => {
                in_predicate = true;
                current.push(c);
            }
            ']' if in_predicate => {
                in_predicate = false;
                current.push(c);
            }
            '/' if !in_predicate => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }

    if in_predicate {
        return Err(PathError::InvalidPath {
            message: format!("unterminated key predicate in '{}'", s),
        });
    }
    if !current.is_empty() {
        out.push(current);
    }
    Ok(out)
}

fn validate_name(name: &str, position: usize, raw: &str) -> Result<(), PathError> {
    lazy_static! {
        static ref NODE_NAME: Regex =
            Regex::new(r"^([A-Za-z_][A-Za-z0-9_.\-]*:)?[A-Za-z_][A-Za-z0-9_.\-]*$").unwrap();
    }
    if NODE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(PathError::InvalidComponent {
            component: raw.to_string(),
            position,
            message: format!("'{}' is not a valid node name", name),
        })
    }
}

fn parse_component(raw: &str, position: usize) -> Result<Component, PathError> {
    let (name, mut rest) = match raw.find('[') {
        Some(i) => (&raw[..i], &raw[i..]),
        None => (raw, ""),
    };
    validate_name(name, position, raw)?;

    let invalid = |message: String| PathError::InvalidComponent {
        component: raw.to_string(),
        position,
        message,
    };

    let mut keys = Vec::new();
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(invalid(format!("unexpected text '{}' after predicate", rest)));
        }
        let close = closing_bracket(rest)
            .ok_or_else(|| invalid("unterminated key predicate".to_string()))?;
        let body = &rest[1..close];
        let (key, value) = body
            .split_once('=')
            .ok_or_else(|| invalid(format!("predicate '{}' has no '='", body)))?;
        validate_name(key, position, raw)?;
        keys.push((key.to_string(), unescape(value)));
        rest = &rest[close + 1..];
    }

    Ok(Component {
        name: name.to_string(),
        keys,
    })
}

/// Byte index of the unescaped `]` closing the predicate that opens at 0.
fn closing_bracket(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices().skip(1) {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            ']' => return Some(i),
            _ => {}
        }
    }
    None
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut escaped = false;
    for c in value.chars() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            out.push(c);
        }
    }
    out
}

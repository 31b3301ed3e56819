//! Remote variable naming.

use std::{borrow::Cow, collections::HashMap, fmt};

use crate::statement::BuildError;

/// Kind of remote object a handle stands for.
///
/// The lowercased tag is the prefix of every remote name allocated for the
/// category, so tags are restricted to ASCII letters and underscores. Digits
/// would let `Table` + `11` collide with `Table1` + `1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Category(Cow<'static, str>);

impl Category {
    pub const TABLE: Self = Self(Cow::Borrowed("Table"));
    pub const COLUMN: Self = Self(Cow::Borrowed("Column"));
    pub const GROUPED_VIEW: Self = Self(Cow::Borrowed("GroupedView"));
    pub const ROW: Self = Self(Cow::Borrowed("Row"));
    pub const DISTRIBUTED_SEQUENCE: Self = Self(Cow::Borrowed("DistributedSequence"));

    /// Create a custom category.
    ///
    /// # Errors
    /// Returns error if the tag is empty, does not start with a letter, or
    /// contains anything other than ASCII letters and underscores.
    pub fn new(tag: impl Into<Cow<'static, str>>) -> Result<Self, BuildError> {
        let tag = tag.into();
        let mut chars = tag.chars();
        let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphabetic() || c == '_');
        if !valid {
            return Err(BuildError::InvalidIdentifier {
                kind: "category",
                value: tag.into_owned(),
            });
        }
        Ok(Self(tag))
    }

    /// The tag as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix shared by every remote name of this category.
    #[must_use]
    pub fn prefix(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Variable identifier bound inside the remote engine's session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteName(String);

impl RemoteName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RemoteName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for RemoteName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Per-category counters for one session.
///
/// Counters are keyed by the lowercased prefix, so `Table` and `TABLE`
/// share one sequence instead of handing out the same name twice.
#[derive(Debug, Default)]
pub struct NameAllocator {
    counters: HashMap<String, u64>,
}

impl NameAllocator {
    /// Create an allocator with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next name for `category`, starting at 1.
    pub fn next(&mut self, category: &Category) -> RemoteName {
        let prefix = category.prefix();
        let counter = self.counters.entry(prefix.clone()).or_insert(0);
        *counter += 1;
        RemoteName(format!("{prefix}{counter}"))
    }

    /// Number of names issued so far for `category`.
    #[must_use]
    pub fn issued(&self, category: &Category) -> u64 {
        self.counters.get(&category.prefix()).copied().unwrap_or(0)
    }

    /// Whether `name` has been handed out by this allocator.
    #[must_use]
    pub fn was_issued(&self, name: &RemoteName) -> bool {
        let text = name.as_str();
        let prefix = text.trim_end_matches(|c: char| c.is_ascii_digit());
        let digits = &text[prefix.len()..];
        if digits.starts_with('0') {
            return false;
        }
        match (digits.parse::<u64>(), self.counters.get(prefix)) {
            (Ok(n), Some(&issued)) => n <= issued,
            _ => false,
        }
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GitabaseError;

/// Gitabase kind token, e.g. `bg`, `sb`, `cc`. Lowercase ASCII, open set:
/// the remote catalog introduces new kinds without a client release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitabaseKind(String);

impl GitabaseKind {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GitabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GitabaseKind {
    type Err = GitabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        if !is_token(&normalized) {
            return Err(GitabaseError::InvalidIdentifier(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Language token, e.g. `en`, `ru`, `es`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Language(String);

impl Language {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Language {
    type Err = GitabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        if !is_token(&normalized) {
            return Err(GitabaseError::InvalidIdentifier(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

fn is_token(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())
}

/// Composite key naming one gitabase: kind plus language. This is the cache
/// key, the filename stem (`<kind>_<language>.<ext>`) and the persisted
/// last-opened preference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitabaseId {
    pub kind: GitabaseKind,
    pub language: Language,
}

impl GitabaseId {
    pub fn new(kind: GitabaseKind, language: Language) -> Self {
        Self { kind, language }
    }

    /// Filename stem for this id, without extension.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.kind, self.language)
    }
}

impl fmt::Display for GitabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind, self.language)
    }
}

impl FromStr for GitabaseId {
    type Err = GitabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (kind, language) = trimmed
            .split_once('_')
            .ok_or_else(|| GitabaseError::InvalidIdentifier(value.to_string()))?;
        Ok(Self {
            kind: kind.parse()?,
            language: language.parse()?,
        })
    }
}

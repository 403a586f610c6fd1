//! Mirror registry
//!
//! Scenario documents refer to download mirrors by short symbolic names.
//! This table turns them into the base URLs the installer expects.

use std::fmt;

use crate::common::{Error, Result};

/// Which installer flag a mirror feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorFamily {
    /// Toolchain source repository (`--idf-mirror`)
    Idf,
    /// Prebuilt tool binaries (`--mirror`)
    Tools,
    /// Python package index (`--pypi-mirror`)
    Pypi,
}

impl fmt::Display for MirrorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorFamily::Idf => write!(f, "idf"),
            MirrorFamily::Tools => write!(f, "tools"),
            MirrorFamily::Pypi => write!(f, "pypi"),
        }
    }
}

/// A single mirror
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MirrorEntry {
    pub family: MirrorFamily,
    /// Symbolic name used in scenario documents
    pub key: String,
    /// Absolute base URL
    pub url: String,
}

/// Built-in mirrors
static MIRRORS: &[(MirrorFamily, &str, &str)] = &[
    (MirrorFamily::Idf, "github", "https://github.com"),
    (MirrorFamily::Idf, "jihulab", "https://jihulab.com/esp-mirror"),
    (MirrorFamily::Tools, "github", "https://github.com"),
    (
        MirrorFamily::Tools,
        "espressifcom",
        "https://dl.espressif.com/github_assets",
    ),
    (
        MirrorFamily::Tools,
        "espressifcn",
        "https://dl.espressif.cn/github_assets",
    ),
    (MirrorFamily::Pypi, "pypi", "https://pypi.org/simple"),
    (
        MirrorFamily::Pypi,
        "aliyun",
        "https://mirrors.aliyun.com/pypi/simple",
    ),
    (
        MirrorFamily::Pypi,
        "ustc",
        "https://mirrors.ustc.edu.cn/pypi/simple",
    ),
    (
        MirrorFamily::Pypi,
        "tsinghua",
        "https://pypi.tuna.tsinghua.edu.cn/simple",
    ),
];

/// Lookup table from symbolic mirror names to URLs
#[derive(Debug, Clone)]
pub struct MirrorTable {
    entries: Vec<MirrorEntry>,
}

impl MirrorTable {
    /// Table with the mirrors the installer ships with
    pub fn builtin() -> Self {
        Self::new(
            MIRRORS
                .iter()
                .map(|(family, key, url)| MirrorEntry {
                    family: *family,
                    key: key.to_string(),
                    url: url.to_string(),
                })
                .collect(),
        )
    }

    pub fn new(entries: Vec<MirrorEntry>) -> Self {
        Self { entries }
    }

    /// All entries in registration order
    pub fn entries(&self) -> &[MirrorEntry] {
        &self.entries
    }

    /// Keys known for a family
    pub fn keys(&self, family: MirrorFamily) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.family == family)
            .map(|e| e.key.as_str())
            .collect()
    }

    /// Resolve a key to its URL
    ///
    /// Keys are matched case-insensitively. An unknown key is an error, never
    /// a silent fallback to the installer's default mirror.
    pub fn resolve(&self, family: MirrorFamily, key: &str) -> Result<&str> {
        let wanted = key.trim();
        self.entries
            .iter()
            .find(|e| e.family == family && e.key.eq_ignore_ascii_case(wanted))
            .map(|e| e.url.as_str())
            .ok_or_else(|| Error::unknown_mirror(&family.to_string(), key, &self.keys(family)))
    }
}

impl Default for MirrorTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_has_every_family() {
        let table = MirrorTable::builtin();
        assert!(!table.keys(MirrorFamily::Idf).is_empty());
        assert!(!table.keys(MirrorFamily::Tools).is_empty());
        assert!(!table.keys(MirrorFamily::Pypi).is_empty());
    }

    #[test]
    fn test_resolve_known_key() {
        let table = MirrorTable::builtin();
        assert_eq!(
            table.resolve(MirrorFamily::Tools, "espressifCOM").unwrap(),
            "https://dl.espressif.com/github_assets"
        );
        assert_eq!(
            table.resolve(MirrorFamily::Idf, "jihulab").unwrap(),
            "https://jihulab.com/esp-mirror"
        );
    }

    #[test]
    fn test_keys_are_scoped_by_family() {
        let table = MirrorTable::builtin();
        assert!(table.resolve(MirrorFamily::Pypi, "jihulab").is_err());
    }

    #[test]
    fn test_unknown_key_is_error() {
        let table = MirrorTable::builtin();
        let err = table.resolve(MirrorFamily::Tools, "nonexistent").unwrap_err();
        assert!(matches!(err, Error::UnknownMirror { .. }));
    }

    #[test]
    fn test_urls_are_absolute() {
        for entry in MirrorTable::builtin().entries() {
            assert!(entry.url.starts_with("https://"), "{}", entry.url);
        }
    }
}

//! Scenario document types
//!
//! A document is an ordered array of test cases, either JSON or YAML. Each
//! entry is parsed on its own so one malformed entry (an unknown `type`, a
//! bad flag value) is reported without losing the rest of the document.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::common::{Error, Result};
use crate::proxy::ProxyMode;

/// Scenario kinds the dispatcher knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioType {
    Prerequisites,
    Arguments,
    Default,
    Custom,
    Offline,
    VersionManagement,
}

impl std::fmt::Display for ScenarioType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScenarioType::Prerequisites => "prerequisites",
            ScenarioType::Arguments => "arguments",
            ScenarioType::Default => "default",
            ScenarioType::Custom => "custom",
            ScenarioType::Offline => "offline",
            ScenarioType::VersionManagement => "version-management",
        };
        write!(f, "{}", name)
    }
}

/// One entry of a scenario document
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseSpec {
    /// Unique within the document, names the scenario log file
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: ScenarioType,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub data: ScenarioData,
    /// Remove install and tools folders once verification is done
    #[serde(default = "default_true")]
    pub delete_after_test: bool,
    pub test_proxy_mode: Option<ProxyMode>,
    #[serde(default)]
    pub proxy_block_list: BTreeSet<String>,
}

fn default_true() -> bool {
    true
}

impl TestCaseSpec {
    /// Proxy mode in effect, offline scenarios block by default
    pub fn proxy_mode(&self) -> ProxyMode {
        match (self.test_proxy_mode, self.kind) {
            (Some(mode), _) => mode,
            (None, ScenarioType::Offline) => ProxyMode::Block,
            (None, _) => ProxyMode::Off,
        }
    }

    /// Name for console output, falling back to the type
    pub fn display_name(&self) -> String {
        if self.name.trim().is_empty() {
            format!("{} #{}", self.kind, self.id)
        } else {
            self.name.clone()
        }
    }
}

/// Per-type payload, every field optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioData {
    /// Pipe-delimited chip identifiers
    pub target_list: Option<String>,
    /// Pipe-delimited versions, `default` resolves through the catalog
    pub idf_list: Option<String>,
    /// Relative to the home directory unless absolute
    pub install_folder: Option<String>,
    pub idf_mirror: Option<String>,
    pub tools_mirror: Option<String>,
    pub pypi_mirror: Option<String>,
    #[serde(default, deserialize_with = "tri_state")]
    pub recursive: Option<bool>,
    #[serde(default, deserialize_with = "tri_state")]
    pub non_interactive: Option<bool>,
    /// Archive suffix for offline installs
    pub offline_package_name: Option<String>,
    /// Substrings the captured output must contain
    #[serde(default)]
    pub expect_output: Vec<String>,
}

/// Accept `true`, `"true"`, `"false"` and friends; absent stays `None`
fn tri_state<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Bool(value)) => Ok(Some(value)),
        Some(Raw::Text(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Some(true)),
            "false" | "no" | "0" => Ok(Some(false)),
            "" => Ok(None),
            other => Err(serde::de::Error::custom(format!(
                "expected a boolean, got '{}'",
                other
            ))),
        },
    }
}

/// An entry that could not be turned into a test case
#[derive(Debug)]
pub struct InvalidEntry {
    /// Position in the document, starting at 0
    pub index: usize,
    /// Whatever id/name could be salvaged for the report
    pub id: Option<u32>,
    pub name: Option<String>,
    pub error: Error,
}

#[derive(Debug)]
pub enum ScenarioEntry {
    Valid(TestCaseSpec),
    Invalid(InvalidEntry),
}

/// Document serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Pick the format from the file extension, JSON unless `.yaml`/`.yml`
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                DocumentFormat::Yaml
            }
            _ => DocumentFormat::Json,
        }
    }
}

/// Parsed scenario document, entries in document order
#[derive(Debug)]
pub struct ScenarioDocument {
    pub path: Option<PathBuf>,
    pub entries: Vec<ScenarioEntry>,
}

impl ScenarioDocument {
    /// Load a document from disk
    ///
    /// Fails only when the file cannot be read or is not an array at all;
    /// per-entry problems become [`ScenarioEntry::Invalid`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let mut document = Self::parse(&content, DocumentFormat::from_path(path))?;
        document.path = Some(path.to_path_buf());
        Ok(document)
    }

    pub fn parse(content: &str, format: DocumentFormat) -> Result<Self> {
        let values: Vec<serde_json::Value> = match format {
            DocumentFormat::Json => serde_json::from_str(content).map_err(|e| {
                Error::Config(format!("Scenario document is not a JSON array: {}", e))
            })?,
            DocumentFormat::Yaml => serde_yaml::from_str(content).map_err(|e| {
                Error::Config(format!("Scenario document is not a YAML sequence: {}", e))
            })?,
        };
        Ok(Self::from_values(values))
    }

    /// Parse every entry, flagging duplicates after the first occurrence
    pub fn from_values(values: Vec<serde_json::Value>) -> Self {
        let mut seen = HashSet::new();
        let entries = values
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                let id = value
                    .get("id")
                    .and_then(|v| v.as_u64())
                    .and_then(|v| u32::try_from(v).ok());
                let name = value.get("name").and_then(|v| v.as_str()).map(str::to_string);

                match serde_json::from_value::<TestCaseSpec>(value) {
                    Ok(spec) if !seen.insert(spec.id) => ScenarioEntry::Invalid(InvalidEntry {
                        index,
                        id,
                        name,
                        error: Error::DuplicateScenarioId(spec.id),
                    }),
                    Ok(spec) => ScenarioEntry::Valid(spec),
                    Err(e) => ScenarioEntry::Invalid(InvalidEntry {
                        index,
                        id,
                        name,
                        error: Error::ScenarioParse {
                            index,
                            message: e.to_string(),
                        },
                    }),
                }
            })
            .collect();

        Self { path: None, entries }
    }

    pub fn valid(&self) -> impl Iterator<Item = &TestCaseSpec> {
        self.entries.iter().filter_map(|entry| match entry {
            ScenarioEntry::Valid(spec) => Some(spec),
            ScenarioEntry::Invalid(_) => None,
        })
    }

    pub fn invalid(&self) -> impl Iterator<Item = &InvalidEntry> {
        self.entries.iter().filter_map(|entry| match entry {
            ScenarioEntry::Invalid(invalid) => Some(invalid),
            ScenarioEntry::Valid(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_json(raw: &str) -> ScenarioDocument {
        ScenarioDocument::parse(raw, DocumentFormat::Json).unwrap()
    }

    #[test]
    fn test_parse_full_entry() {
        let doc = parse_json(
            r#"[{
                "id": 7,
                "type": "custom",
                "name": "Custom install",
                "data": {
                    "targetList": "esp32|esp32c6",
                    "idfList": "v5.3.2|v5.4",
                    "installFolder": ".espressif",
                    "toolsMirror": "espressifcom",
                    "recursive": "false",
                    "nonInteractive": true
                },
                "deleteAfterTest": false,
                "testProxyMode": "block-list",
                "proxyBlockList": ["github.com"]
            }]"#,
        );
        let spec = doc.valid().next().unwrap();
        assert_eq!(spec.id, 7);
        assert_eq!(spec.kind, ScenarioType::Custom);
        assert!(!spec.delete_after_test);
        assert_eq!(spec.proxy_mode(), ProxyMode::BlockList);
        assert!(spec.proxy_block_list.contains("github.com"));
        assert_eq!(spec.data.recursive, Some(false));
        assert_eq!(spec.data.non_interactive, Some(true));
        assert_eq!(spec.data.tools_mirror.as_deref(), Some("espressifcom"));
    }

    #[test]
    fn test_defaults() {
        let doc = parse_json(r#"[{"id": 1, "type": "offline"}, {"id": 2, "type": "default"}]"#);
        let specs: Vec<_> = doc.valid().collect();
        assert!(specs[0].delete_after_test);
        assert_eq!(specs[0].proxy_mode(), ProxyMode::Block);
        assert_eq!(specs[1].proxy_mode(), ProxyMode::Off);
        assert_eq!(specs[1].data.recursive, None);
        assert_eq!(specs[1].display_name(), "default #2");
    }

    #[test]
    fn test_unknown_type_is_isolated() {
        let doc = parse_json(
            r#"[
                {"id": 1, "type": "teleport", "name": "bogus"},
                {"id": 2, "type": "arguments", "name": "args"}
            ]"#,
        );
        let invalid: Vec<_> = doc.invalid().collect();
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].id, Some(1));
        assert_eq!(invalid[0].name.as_deref(), Some("bogus"));
        assert!(invalid[0].error.to_string().contains("teleport"));
        assert_eq!(doc.valid().count(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected_after_first() {
        let doc = parse_json(
            r#"[
                {"id": 3, "type": "default", "name": "first"},
                {"id": 3, "type": "custom", "name": "second"}
            ]"#,
        );
        assert_eq!(doc.valid().next().unwrap().name, "first");
        let invalid = doc.invalid().next().unwrap();
        assert_eq!(invalid.index, 1);
        assert!(matches!(invalid.error, Error::DuplicateScenarioId(3)));
    }

    #[test]
    fn test_bad_tri_state_value() {
        let doc = parse_json(r#"[{"id": 1, "type": "custom", "data": {"recursive": "maybe"}}]"#);
        let invalid = doc.invalid().next().unwrap();
        assert!(invalid.error.to_string().contains("maybe"));
    }

    #[test]
    fn test_not_an_array() {
        assert!(ScenarioDocument::parse(r#"{"id": 1}"#, DocumentFormat::Json).is_err());
    }

    #[test]
    fn test_yaml_document() {
        let doc = ScenarioDocument::parse(
            "- id: 4\n  type: version-management\n  name: select\n  deleteAfterTest: false\n",
            DocumentFormat::Yaml,
        )
        .unwrap();
        let spec = doc.valid().next().unwrap();
        assert_eq!(spec.kind, ScenarioType::VersionManagement);
        assert!(!spec.delete_after_test);
        assert_eq!(DocumentFormat::from_path(Path::new("s.yml")), DocumentFormat::Yaml);
        assert_eq!(DocumentFormat::from_path(Path::new("s.json")), DocumentFormat::Json);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ScenarioDocument::load(Path::new("/no/such/scenarios.json")).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }
}

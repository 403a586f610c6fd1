//! Remote version catalog
//!
//! Fetches the published list of toolchain versions and picks the version
//! that `"default"` stands for in scenario documents. When the manifest
//! cannot be fetched or parsed the compiled-in fallback is used; no other
//! partial-failure handling is attempted.

use std::time::Duration;

use serde::Deserialize;

use crate::common::{Error, Result};

/// Version used when the manifest is unavailable and no override is set
pub const FALLBACK_IDF_VERSION: &str = "v5.4.1";

/// Chip used when a scenario names no targets
pub const DEFAULT_TARGET: &str = "esp32";

/// Token in scenario documents that stands for the catalog default
pub const DEFAULT_TOKEN: &str = "default";

/// Manifest as published next to the installer downloads
#[derive(Debug, Deserialize)]
pub struct Manifest {
    #[serde(rename = "VERSIONS", default)]
    pub versions: Vec<ManifestVersion>,
    #[serde(rename = "IDF_TARGETS", default)]
    pub targets: Vec<ManifestTarget>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestVersion {
    pub name: String,
    #[serde(default)]
    pub old: bool,
    #[serde(default)]
    pub end_of_life: bool,
    #[serde(default)]
    pub pre_release: bool,
    #[serde(default)]
    pub supported_targets: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestTarget {
    #[serde(default)]
    pub text: String,
    pub value: String,
}

/// Where the catalog data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogSource {
    Remote,
    Fallback,
}

/// Resolved catalog, immutable for the rest of the run
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionCatalog {
    pub default_version: String,
    pub default_target: String,
    /// Every stable version name, newest first
    pub versions: Vec<String>,
    pub targets: Vec<String>,
    pub source: CatalogSource,
}

impl VersionCatalog {
    /// Fetch the manifest, falling back to defaults on any failure
    pub async fn fetch(url: &str, timeout: Duration, fallback_version: Option<&str>) -> Self {
        match fetch_manifest(url, timeout).await.and_then(Self::from_manifest) {
            Ok(catalog) => {
                tracing::info!(
                    "Version catalog loaded from {}: default {}",
                    url,
                    catalog.default_version
                );
                catalog
            }
            Err(e) => {
                let catalog = Self::fallback(fallback_version);
                tracing::warn!(
                    "Using fallback version {} ({})",
                    catalog.default_version,
                    e
                );
                catalog
            }
        }
    }

    /// Build a catalog from a parsed manifest
    pub fn from_manifest(manifest: Manifest) -> Result<Self> {
        let stable: Vec<&ManifestVersion> = manifest
            .versions
            .iter()
            .filter(|v| {
                !v.name.eq_ignore_ascii_case("latest") && !v.old && !v.end_of_life && !v.pre_release
            })
            .collect();

        let mut ranked: Vec<(semver::Version, &ManifestVersion)> = stable
            .iter()
            .filter_map(|v| parse_version(&v.name).map(|parsed| (parsed, *v)))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        // The manifest lists its recommended version first
        let default = stable
            .first()
            .copied()
            .ok_or_else(|| Error::Catalog("manifest lists no stable version".to_string()))?;

        let targets: Vec<String> = if manifest.targets.is_empty() {
            default.supported_targets.clone()
        } else {
            manifest.targets.iter().map(|t| t.value.clone()).collect()
        };
        let default_target = if targets.is_empty() || targets.iter().any(|t| t == DEFAULT_TARGET) {
            DEFAULT_TARGET.to_string()
        } else {
            targets[0].clone()
        };

        Ok(Self {
            default_version: default.name.clone(),
            default_target,
            versions: ranked.iter().map(|(_, v)| v.name.clone()).collect(),
            targets,
            source: CatalogSource::Remote,
        })
    }

    /// Catalog built from compiled-in defaults
    ///
    /// `override_version` (from the environment) replaces the compiled-in
    /// fallback version, it never takes precedence over a fetched manifest.
    pub fn fallback(override_version: Option<&str>) -> Self {
        let version = override_version
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(FALLBACK_IDF_VERSION)
            .to_string();
        Self {
            default_version: version.clone(),
            default_target: DEFAULT_TARGET.to_string(),
            versions: vec![version],
            targets: vec![DEFAULT_TARGET.to_string()],
            source: CatalogSource::Fallback,
        }
    }

    /// Replace the `"default"` token by the catalog default
    pub fn resolve_version(&self, token: &str) -> String {
        if token.trim().eq_ignore_ascii_case(DEFAULT_TOKEN) {
            self.default_version.clone()
        } else {
            token.trim().to_string()
        }
    }

    /// Replace the `"default"` token by the default chip
    pub fn resolve_target(&self, token: &str) -> String {
        if token.trim().eq_ignore_ascii_case(DEFAULT_TOKEN) {
            self.default_target.clone()
        } else {
            token.trim().to_string()
        }
    }
}

/// Parse `v5.4`, `v5.3.2` or `5.1.4` into a comparable version
fn parse_version(name: &str) -> Option<semver::Version> {
    let raw = name.trim().trim_start_matches(['v', 'V']);
    let mut parts: Vec<&str> = raw.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.parse::<u64>().is_err()) {
        return None;
    }
    while parts.len() < 3 {
        parts.push("0");
    }
    semver::Version::parse(&parts.join(".")).ok()
}

async fn fetch_manifest(url: &str, timeout: Duration) -> Result<Manifest> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Catalog(format!("Failed to build HTTP client: {}", e)))?;

    let response = client
        .get(url)
        .header("User-Agent", "installer-harness")
        .send()
        .await
        .map_err(|e| Error::Catalog(format!("Failed to fetch {}: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(Error::Catalog(format!(
            "Manifest request returned status {}",
            response.status()
        )));
    }

    response
        .json::<Manifest>()
        .await
        .map_err(|e| Error::Catalog(format!("Failed to parse manifest: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const MANIFEST: &str = r#"{
        "VERSIONS": [
            {"name": "latest", "old": false},
            {"name": "v5.5", "pre_release": true},
            {"name": "v5.4.1", "old": false, "supported_targets": ["esp32", "esp32c6"]},
            {"name": "v5.3.2", "old": false},
            {"name": "v4.4.8", "old": true, "end_of_life": true}
        ],
        "IDF_TARGETS": [
            {"text": "ESP32", "value": "esp32"},
            {"text": "ESP32-C6", "value": "esp32c6"}
        ]
    }"#;

    #[test]
    fn test_default_is_first_stable_entry() {
        let manifest: Manifest = serde_json::from_str(MANIFEST).unwrap();
        let catalog = VersionCatalog::from_manifest(manifest).unwrap();
        assert_eq!(catalog.default_version, "v5.4.1");
        assert_eq!(catalog.versions, vec!["v5.4.1", "v5.3.2"]);
        assert_eq!(catalog.default_target, "esp32");
        assert_eq!(catalog.source, CatalogSource::Remote);
    }

    #[test]
    fn test_default_follows_manifest_order_not_version_number() {
        let manifest: Manifest = serde_json::from_str(
            r#"{"VERSIONS": [
                {"name": "latest"},
                {"name": "v5.6", "end_of_life": true},
                {"name": "v5.3.2"},
                {"name": "v5.4.1"}
            ]}"#,
        )
        .unwrap();
        let catalog = VersionCatalog::from_manifest(manifest).unwrap();
        assert_eq!(catalog.default_version, "v5.3.2");
        // The listing stays sorted newest first
        assert_eq!(catalog.versions, vec!["v5.4.1", "v5.3.2"]);
    }

    #[test]
    fn test_manifest_without_stable_versions_is_error() {
        let manifest: Manifest =
            serde_json::from_str(r#"{"VERSIONS": [{"name": "latest"}]}"#).unwrap();
        assert!(VersionCatalog::from_manifest(manifest).is_err());
    }

    #[test]
    fn test_fallback_honours_override() {
        assert_eq!(VersionCatalog::fallback(None).default_version, FALLBACK_IDF_VERSION);
        let catalog = VersionCatalog::fallback(Some("v5.2.3"));
        assert_eq!(catalog.default_version, "v5.2.3");
        assert_eq!(catalog.source, CatalogSource::Fallback);
        assert_eq!(VersionCatalog::fallback(Some("  ")).default_version, FALLBACK_IDF_VERSION);
    }

    #[test]
    fn test_resolve_default_token() {
        let catalog = VersionCatalog::fallback(Some("v5.4.1"));
        assert_eq!(catalog.resolve_version("default"), "v5.4.1");
        assert_eq!(catalog.resolve_version("Default"), "v5.4.1");
        assert_eq!(catalog.resolve_version("v5.3.2"), "v5.3.2");
        assert_eq!(catalog.resolve_target("default"), "esp32");
    }

    #[test]
    fn test_parse_version_variants() {
        assert_eq!(parse_version("v5.4").unwrap(), semver::Version::new(5, 4, 0));
        assert_eq!(parse_version("5.3.2").unwrap(), semver::Version::new(5, 3, 2));
        assert!(parse_version("release/v5.4").is_none());
        assert!(parse_version("master").is_none());
    }

    #[tokio::test]
    async fn test_fetch_unreachable_falls_back() {
        // Bind then drop a listener to get a port nobody is serving
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = format!("http://{}/idf_versions.json", addr);
        let catalog = VersionCatalog::fetch(&url, Duration::from_secs(2), Some("v5.1.6")).await;
        assert_eq!(catalog.source, CatalogSource::Fallback);
        assert_eq!(catalog.default_version, "v5.1.6");
    }

    #[tokio::test]
    async fn test_fetch_serves_manifest() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                MANIFEST.len(),
                MANIFEST
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        });

        let url = format!("http://{}/idf_versions.json", addr);
        let catalog = VersionCatalog::fetch(&url, Duration::from_secs(5), Some("v5.1.6")).await;
        assert_eq!(catalog.source, CatalogSource::Remote);
        assert_eq!(catalog.default_version, "v5.4.1");
    }
}

//! Remote package index.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use plugdeck_core::{BoxFuture, DEFAULT_PACKAGE_INDEX, HostError, HostResult};
use serde::Deserialize;

use crate::version::{VersionSpec, compare_versions};

/// Source of package versions and tarballs.
pub trait PackageIndex: Send + Sync {
    /// Pick the concrete version to download for `spec`.
    fn resolve<'a>(&'a self, name: &'a str, spec: &'a VersionSpec) -> BoxFuture<'a, HostResult<String>>;

    /// Fetch the archive bytes of `name@version`.
    fn download<'a>(&'a self, name: &'a str, version: &'a str) -> BoxFuture<'a, HostResult<Vec<u8>>>;
}

#[derive(Debug, Deserialize)]
struct Packument {
    #[serde(rename = "dist-tags", default)]
    dist_tags: HashMap<String, String>,
    #[serde(default)]
    versions: HashMap<String, PackumentVersion>,
}

#[derive(Debug, Deserialize)]
struct PackumentVersion {
    dist: Dist,
}

#[derive(Debug, Deserialize)]
struct Dist {
    tarball: String,
}

/// npm-compatible registry client.
#[derive(Clone)]
pub struct NpmIndex {
    base_url: String,
    client: reqwest::Client,
    tarballs: Arc<DashMap<(String, String), String>>,
}

impl NpmIndex {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            tarballs: Arc::new(DashMap::new()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn metadata_url(&self, name: &str) -> String {
        // Scoped names keep the '@' but escape the slash.
        format!("{}/{}", self.base_url, name.replace('/', "%2F"))
    }

    async fn packument(&self, name: &str) -> HostResult<Packument> {
        let download_err = |message: String| HostError::Download {
            package: name.to_string(),
            message,
        };

        let response = self
            .client
            .get(self.metadata_url(name))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| download_err(format!("failed to reach index: {e}")))?;

        if response.status().as_u16() == 404 {
            return Err(HostError::not_found("Package", name));
        }
        if !response.status().is_success() {
            return Err(download_err(format!("index error: {}", response.status())));
        }

        let packument: Packument = response
            .json()
            .await
            .map_err(|e| download_err(format!("failed to parse index response: {e}")))?;

        for (version, meta) in &packument.versions {
            self.tarballs
                .insert((name.to_string(), version.clone()), meta.dist.tarball.clone());
        }
        Ok(packument)
    }

    async fn resolve_version(&self, name: &str, spec: &VersionSpec) -> HostResult<String> {
        let packument = self.packument(name).await?;
        pick_version(&packument, spec).ok_or_else(|| {
            HostError::not_found("Package version", format!("{name}@{spec}"))
        })
    }

    async fn fetch(&self, name: &str, version: &str) -> HostResult<Vec<u8>> {
        let key = (name.to_string(), version.to_string());
        let url = match self.tarballs.get(&key) {
            Some(url) => url.clone(),
            None => {
                self.packument(name).await?;
                self.tarballs
                    .get(&key)
                    .map(|url| url.clone())
                    .ok_or_else(|| HostError::not_found("Package version", format!("{name}@{version}")))?
            }
        };

        tracing::info!(package = name, version, url = %url, "downloading package");
        let response = self.client.get(&url).send().await.map_err(|e| HostError::Download {
            package: name.to_string(),
            message: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(HostError::Download {
                package: name.to_string(),
                message: format!("download failed: {}", response.status()),
            });
        }
        let bytes = response.bytes().await.map_err(|e| HostError::Download {
            package: name.to_string(),
            message: format!("failed to read download: {e}"),
        })?;
        Ok(bytes.to_vec())
    }
}

impl Default for NpmIndex {
    fn default() -> Self {
        Self::new(DEFAULT_PACKAGE_INDEX)
    }
}

impl PackageIndex for NpmIndex {
    fn resolve<'a>(&'a self, name: &'a str, spec: &'a VersionSpec) -> BoxFuture<'a, HostResult<String>> {
        Box::pin(self.resolve_version(name, spec))
    }

    fn download<'a>(&'a self, name: &'a str, version: &'a str) -> BoxFuture<'a, HostResult<Vec<u8>>> {
        Box::pin(self.fetch(name, version))
    }
}

/// `latest` when it satisfies the range, otherwise the newest matching version.
fn pick_version(packument: &Packument, spec: &VersionSpec) -> Option<String> {
    if let Some(latest) = packument.dist_tags.get("latest") {
        if spec.matches(latest) {
            return Some(latest.clone());
        }
    }
    packument
        .versions
        .keys()
        .filter(|v| spec.matches(v))
        .max_by(|a, b| compare_versions(a, b))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packument() -> Packument {
        serde_json::from_value(serde_json::json!({
            "dist-tags": { "latest": "2.1.0" },
            "versions": {
                "1.4.0": { "dist": { "tarball": "https://r/x-1.4.0.tgz" } },
                "1.5.2": { "dist": { "tarball": "https://r/x-1.5.2.tgz" } },
                "2.1.0": { "dist": { "tarball": "https://r/x-2.1.0.tgz" } }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_pick_latest_for_any() {
        assert_eq!(pick_version(&packument(), &VersionSpec::Any), Some("2.1.0".into()));
    }

    #[test]
    fn test_pick_newest_matching_when_latest_excluded() {
        let spec = VersionSpec::parse("^1.0.0");
        assert_eq!(pick_version(&packument(), &spec), Some("1.5.2".into()));
        assert_eq!(pick_version(&packument(), &VersionSpec::parse("^3")), None);
    }

    #[test]
    fn test_scoped_metadata_url() {
        let index = NpmIndex::new("https://registry.example/");
        assert_eq!(
            index.metadata_url("@vue/shared"),
            "https://registry.example/@vue%2Fshared"
        );
    }
}

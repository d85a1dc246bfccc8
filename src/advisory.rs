//! Advisory view and lookup capability.
//!
//! Advisories are authored and stored outside this crate; the delivery
//! engine only resolves an opaque reference into an [`AdvisoryView`] right
//! before rendering. The view is deliberately loose: real advisory records
//! come from several generations of authoring tools, so almost every field
//! is optional and several carry historical aliases (`display_title`,
//! `criticality`, `cve_ids` vs `cves`). The template layer resolves those
//! chains; this type just carries them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::HeraldError;

/// A security bulletin as seen by the renderer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvisoryView {
    /// Opaque identifier assigned by the authoring system.
    pub id: String,
    pub title: Option<String>,
    /// Alias used by older authoring tools; falls back into `title`.
    pub display_title: Option<String>,
    pub severity: Option<String>,
    /// Newer records carry `criticality` instead of `severity`.
    pub criticality: Option<String>,
    pub threat_type: Option<String>,
    /// Traffic Light Protocol marking (CLEAR, GREEN, AMBER, RED).
    pub tlp: Option<String>,
    pub vendor: Option<String>,
    pub category: Option<String>,
    pub author: Option<String>,
    pub executive_summary: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub cvss_score: Option<f64>,
    #[serde(default, alias = "cves")]
    pub cve_ids: Vec<String>,
    #[serde(default)]
    pub affected_products: Vec<String>,
    #[serde(default, alias = "affected_sectors")]
    pub sectors: Vec<String>,
    #[serde(default, alias = "affected_regions")]
    pub regions: Vec<String>,
    #[serde(default, alias = "mitre_attack")]
    pub mitre_tactics: Vec<MitreTactic>,
    #[serde(default, alias = "iocs")]
    pub indicators: Vec<Indicator>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default, alias = "patch_details")]
    pub patch_steps: Vec<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl AdvisoryView {
    /// Create an empty advisory with just an id (every other field absent).
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// One row of a MITRE ATT&CK mapping table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MitreTactic {
    pub tactic: Option<String>,
    #[serde(alias = "techniqueId")]
    pub technique_id: Option<String>,
    pub technique: Option<String>,
}

/// Kind of an indicator of compromise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Domain,
    #[serde(alias = "ip")]
    Ipv4,
    Md5,
    Sha1,
    Sha256,
    /// Hash of unspecified algorithm; classified by value length at render
    /// time (32 = MD5, 40 = SHA-1, 64 = SHA-256).
    Hash,
}

/// A single indicator of compromise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Indicator {
    #[serde(rename = "type")]
    pub kind: IndicatorKind,
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Indicator {
    pub fn new(kind: IndicatorKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            description: None,
        }
    }
}

/// Capability to resolve an advisory reference into a view.
///
/// A missing advisory is not an error at this seam - the worker decides what
/// a `None` means (a non-retryable delivery failure).
#[async_trait]
pub trait AdvisoryLookup: Send + Sync {
    async fn get(&self, advisory_ref: &str) -> Result<Option<AdvisoryView>, HeraldError>;
}

/// In-memory advisory lookup for tests and development.
#[derive(Default)]
pub struct MemoryAdvisoryStore {
    advisories: RwLock<HashMap<String, AdvisoryView>>,
}

impl MemoryAdvisoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store wrapped in an Arc for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert or replace an advisory, keyed by its id.
    pub fn put(&self, advisory: AdvisoryView) {
        self.advisories
            .write()
            .insert(advisory.id.clone(), advisory);
    }

    pub fn remove(&self, id: &str) -> bool {
        self.advisories.write().remove(id).is_some()
    }
}

#[async_trait]
impl AdvisoryLookup for MemoryAdvisoryStore {
    async fn get(&self, advisory_ref: &str) -> Result<Option<AdvisoryView>, HeraldError> {
        Ok(self.advisories.read().get(advisory_ref).cloned())
    }
}

#[async_trait]
impl AdvisoryLookup for Arc<MemoryAdvisoryStore> {
    async fn get(&self, advisory_ref: &str) -> Result<Option<AdvisoryView>, HeraldError> {
        (**self).get(advisory_ref).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryAdvisoryStore::new();
        let mut advisory = AdvisoryView::new("adv-1");
        advisory.title = Some("OpenSSL heap overflow".into());
        store.put(advisory);

        let found = store.get("adv-1").await.unwrap().unwrap();
        assert_eq!(found.title.as_deref(), Some("OpenSSL heap overflow"));
        assert!(store.get("adv-2").await.unwrap().is_none());
    }

    #[test]
    fn deserializes_aliased_fields() {
        let advisory: AdvisoryView = serde_json::from_str(
            r#"{
                "id": "adv-9",
                "display_title": "Legacy title",
                "criticality": "HIGH",
                "cves": ["CVE-2024-0001"],
                "iocs": [{"type": "domain", "value": "evil.example"}]
            }"#,
        )
        .unwrap();

        assert_eq!(advisory.display_title.as_deref(), Some("Legacy title"));
        assert_eq!(advisory.cve_ids, vec!["CVE-2024-0001"]);
        assert_eq!(advisory.indicators.len(), 1);
        assert_eq!(advisory.indicators[0].kind, IndicatorKind::Domain);
    }
}

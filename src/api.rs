//! JSON:API envelope types for App Store Connect resources.
//!
//! The upstream service wraps every resource in `{data, included?, links?,
//! meta?}` and failures in `{errors: […]}`. Attributes stay schemaless
//! (`serde_json::Value`) so one envelope serves every resource type.

use crate::pagination::Page;
use serde::{Deserialize, Serialize};

/// A single resource object: type tag, id, and untyped attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<serde_json::Value>,
}

impl Resource {
    /// A named attribute as a string, when present.
    #[must_use]
    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attributes.as_ref()?.get(name)?.as_str()
    }
}

/// Pagination links carried by list responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Links {
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Paging {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paging: Option<Paging>,
}

/// Envelope for a single resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDocument {
    pub data: Resource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included: Option<Vec<Resource>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// Envelope for a resource collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceList {
    pub data: Vec<Resource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included: Option<Vec<Resource>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl Page for ResourceList {
    type Item = Resource;

    fn next_url(&self) -> Option<String> {
        self.links.as_ref()?.next.clone()
    }

    fn into_items(self) -> Vec<Resource> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_envelope_round_trip() {
        let body = r#"{
            "data": [{"type": "apps", "id": "123", "attributes": {"name": "Demo", "bundleId": "com.example"}}],
            "links": {"self": "https://api.appstoreconnect.apple.com/v1/apps", "next": "https://api.appstoreconnect.apple.com/v1/apps?cursor=AB"},
            "meta": {"paging": {"total": 7, "limit": 1}}
        }"#;
        let list: ResourceList = serde_json::from_str(body).unwrap();
        assert_eq!(list.data.len(), 1);
        assert_eq!(list.data[0].attribute_str("name"), Some("Demo"));
        assert_eq!(
            list.next_url().as_deref(),
            Some("https://api.appstoreconnect.apple.com/v1/apps?cursor=AB")
        );
        assert_eq!(list.meta.unwrap().paging.unwrap().total, Some(7));
    }

    #[test]
    fn test_absent_links_means_last_page() {
        let list: ResourceList = serde_json::from_str(r#"{"data": []}"#).unwrap();
        assert!(list.next_url().is_none());
    }
}

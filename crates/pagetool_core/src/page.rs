use anyhow::Result;
use serde::{Deserialize, Serialize};

/// One retrieved content item. Sections behind `expand` are optional so a
/// fetch without the matching expansion still decodes; accessors fail with
/// a hint naming the missing expansion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<SpaceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ancestors: Vec<AncestorRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpaceRef {
    pub key: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionInfo {
    pub number: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Body {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<BodyContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BodyContent {
    pub value: String,
    pub representation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AncestorRef {
    pub id: String,
}

impl ContentItem {
    pub fn space_key(&self) -> Result<&str> {
        self.space
            .as_ref()
            .map(|space| space.key.as_str())
            .ok_or_else(|| {
                anyhow::anyhow!("space is not available for {} (expand=space)", self.title)
            })
    }

    pub fn version_number(&self) -> Result<i64> {
        self.version
            .map(|version| version.number)
            .ok_or_else(|| {
                anyhow::anyhow!("version is not available for {} (expand=version)", self.title)
            })
    }

    pub fn storage_value(&self) -> Result<&str> {
        self.body
            .as_ref()
            .and_then(|body| body.storage.as_ref())
            .map(|storage| storage.value.as_str())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "storage body is not available for {} (expand=body.storage)",
                    self.title
                )
            })
    }
}

/// One page of search results as reported by the remote listing operation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchPage {
    #[serde(default)]
    pub results: Vec<ContentItem>,
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub size: usize,
    #[serde(default)]
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::{ContentItem, SearchPage};

    #[test]
    fn decodes_expanded_item() {
        let payload = serde_json::json!({
            "id": "123",
            "title": "Alpha",
            "space": {"key": "DOC"},
            "version": {"number": 7},
            "body": {"storage": {"value": "<p>hi</p>", "representation": "storage"}},
            "ancestors": [{"id": "99"}]
        });
        let item: ContentItem = serde_json::from_value(payload).expect("decode");
        assert_eq!(item.space_key().expect("space"), "DOC");
        assert_eq!(item.version_number().expect("version"), 7);
        assert_eq!(item.storage_value().expect("body"), "<p>hi</p>");
        assert_eq!(item.ancestors[0].id, "99");
    }

    #[test]
    fn decodes_bare_item_and_fails_accessors_with_expand_hint() {
        let payload = serde_json::json!({"id": "123", "title": "Alpha"});
        let item: ContentItem = serde_json::from_value(payload).expect("decode");
        assert!(item.space.is_none());
        let error = item.version_number().expect_err("must fail");
        assert!(error.to_string().contains("expand=version"));
        let error = item.storage_value().expect_err("must fail");
        assert!(error.to_string().contains("expand=body.storage"));
    }

    #[test]
    fn decodes_search_page_with_missing_fields() {
        let page: SearchPage = serde_json::from_value(serde_json::json!({
            "results": [{"id": "1", "title": "A"}],
            "size": 1,
            "limit": 25
        }))
        .expect("decode");
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.start, 0);
    }
}

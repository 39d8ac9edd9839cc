//! One page of upstream results.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::character::UpstreamRecord;

/// Pagination metadata sent alongside the results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub prev: Option<String>,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub pages: u64,
}

#[derive(Deserialize)]
struct RawPage {
    info: PageInfo,
    #[serde(default)]
    results: Vec<Value>,
}

/// A decoded page: `{"info": {...}, "results": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchPage {
    pub info: PageInfo,
    #[serde(rename = "results")]
    pub records: Vec<UpstreamRecord>,
}

impl FetchPage {
    /// Decode a response body.
    ///
    /// The envelope must be well formed. Individual results without an
    /// integer `id` are logged and dropped.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: RawPage = serde_json::from_slice(body)?;

        let mut records = Vec::with_capacity(raw.results.len());
        for (index, value) in raw.results.into_iter().enumerate() {
            match UpstreamRecord::from_value(value) {
                Some(record) => records.push(record),
                None => warn!("Skipping result {} without a numeric id", index),
            }
        }

        Ok(Self {
            info: raw.info,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_page() {
        let body = br#"{
            "info": {
                "count": 826, "pages": 42,
                "next": "https://example.com/?page=2", "prev": null
            },
            "results": [{"id": 1, "name": "Rick"}, {"id": 2, "name": "Morty"}]
        }"#;

        let page = FetchPage::from_slice(body).unwrap();
        assert_eq!(page.info.count, 826);
        assert_eq!(page.info.pages, 42);
        assert_eq!(page.info.next.as_deref(), Some("https://example.com/?page=2"));
        assert_eq!(page.info.prev, None);
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[1].name(), Some("Morty"));
    }

    #[test]
    fn test_decode_skips_records_without_id() {
        let body = br#"{"info": {"count": 2, "pages": 1}, "results": [{"name": "x"}, {"id": 5}]}"#;
        let page = FetchPage::from_slice(body).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].id(), 5);
    }

    #[test]
    fn test_decode_rejects_bad_envelope() {
        assert!(FetchPage::from_slice(b"<html>oops</html>").is_err());
        assert!(FetchPage::from_slice(br#"{"results": []}"#).is_err());
    }

    #[test]
    fn test_serializes_in_upstream_shape() {
        let body =
            br#"{"info": {"count": 1, "pages": 1}, "results": [{"id": 9, "name": "Summer"}]}"#;
        let page = FetchPage::from_slice(body).unwrap();
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["info"]["count"], 1);
        assert_eq!(json["results"][0]["name"], "Summer");
    }
}

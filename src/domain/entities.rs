//! Content snapshots published by the CMS on every write.
//!
//! Only the fields that decide which public URLs an entity appears on are
//! modelled; everything else in the CMS payload is ignored on decode.

use serde::{Deserialize, Serialize};

use crate::domain::types::ArticleKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionRecord {
    pub slug: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRecord {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    /// Destinations without a region are not routable under a region path.
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationDetailsRecord {
    pub slug: String,
    #[serde(default)]
    pub title: String,
    pub destination: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub order: i32,
}

/// Destination reference embedded in a tour snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationRef {
    pub slug: String,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TourRecord {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub destinations: Vec<DestinationRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItineraryDayRecord {
    pub tour: String,
    pub day: i32,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub slug: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub kind: ArticleKind,
}

/// Free-form CMS page served from the catch-all route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    /// Path relative to the site root, e.g. `about/team`.
    pub path: String,
    #[serde(default)]
    pub title: String,
}

impl PageRecord {
    pub fn url(&self) -> String {
        format!("/{}", self.path.trim_matches('/'))
    }
}

/// The single active site configuration row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SiteSettingsRecord {
    #[serde(default)]
    pub site_title: String,
    #[serde(default)]
    pub contact_email: String,
    #[serde(default)]
    pub banner_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationItem {
    pub label: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NavigationMenuRecord {
    #[serde(default)]
    pub items: Vec<NavigationItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_url_normalizes_slashes() {
        let page = PageRecord {
            path: "/about/team/".to_string(),
            title: String::new(),
        };
        assert_eq!(page.url(), "/about/team");
    }

    #[test]
    fn tour_snapshot_ignores_unknown_fields() {
        let tour: TourRecord = serde_json::from_value(serde_json::json!({
            "slug": "silk-road",
            "price": "2450.00",
            "destinations": [{ "slug": "kazakhstan", "region": "asia" }]
        }))
        .expect("tour decodes");

        assert_eq!(tour.slug, "silk-road");
        assert_eq!(tour.destinations.len(), 1);
        assert!(tour.name.is_empty());
    }
}

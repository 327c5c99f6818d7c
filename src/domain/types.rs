//! Shared domain enumerations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Content kinds the CMS publishes write events for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Region,
    Destination,
    DestinationDetails,
    Tour,
    ItineraryDay,
    Article,
    Page,
    SiteSettings,
    NavigationMenu,
    FormSubmission,
    PageVisit,
}

impl EntityKind {
    pub const ALL: [EntityKind; 11] = [
        EntityKind::Region,
        EntityKind::Destination,
        EntityKind::DestinationDetails,
        EntityKind::Tour,
        EntityKind::ItineraryDay,
        EntityKind::Article,
        EntityKind::Page,
        EntityKind::SiteSettings,
        EntityKind::NavigationMenu,
        EntityKind::FormSubmission,
        EntityKind::PageVisit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Region => "region",
            EntityKind::Destination => "destination",
            EntityKind::DestinationDetails => "destination_details",
            EntityKind::Tour => "tour",
            EntityKind::ItineraryDay => "itinerary_day",
            EntityKind::Article => "article",
            EntityKind::Page => "page",
            EntityKind::SiteSettings => "site_settings",
            EntityKind::NavigationMenu => "navigation_menu",
            EntityKind::FormSubmission => "form_submission",
            EntityKind::PageVisit => "page_visit",
        }
    }

    /// Whether instances of this kind feed into any public page.
    ///
    /// Customer form submissions and analytics visits never appear on a
    /// cached page, so their writes are allowed to stay cache-inert.
    pub fn renders_pages(self) -> bool {
        !matches!(self, EntityKind::FormSubmission | EntityKind::PageVisit)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleKind {
    #[default]
    News,
    Blog,
}

impl ArticleKind {
    /// Listing page the article appears on.
    pub fn listing_path(self) -> &'static str {
        match self {
            ArticleKind::News => "/news/",
            ArticleKind::Blog => "/blog/",
        }
    }
}

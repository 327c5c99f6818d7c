//! Which public pages each content kind appears on.
//!
//! URL layout of the public site:
//!
//! - `/region/{region}`
//! - `/destination/{region}/{destination}/`
//! - `/details/{region}/{destination}/{detail}/`
//! - `/tours/`, `/tour/{slug}`
//! - `/news/`, `/blog/`, `/article/{slug}`
//! - `/{path}` for free-form pages

use crate::cache::{CacheInvalidating, CachePath, InvalidationRegistry, InvalidationTarget};
use crate::domain::entities::{
    ArticleRecord, DestinationDetailsRecord, DestinationRecord, DestinationRef,
    ItineraryDayRecord, NavigationMenuRecord, PageRecord, RegionRecord, SiteSettingsRecord,
    TourRecord,
};
use crate::domain::types::EntityKind;

const FRONT_PAGE: &str = "/";
const TOURS_LISTING: &str = "/tours/";
const TOUR_PAGES: &str = "/tour/";
const DESTINATION_PAGES: &str = "/destination/";
const DETAIL_PAGES: &str = "/details/";

/// Registry containing every content kind that renders public pages.
pub fn content_registry() -> InvalidationRegistry {
    InvalidationRegistry::new()
        .with::<RegionRecord>()
        .with::<DestinationRecord>()
        .with::<DestinationDetailsRecord>()
        .with::<TourRecord>()
        .with::<ItineraryDayRecord>()
        .with::<ArticleRecord>()
        .with::<PageRecord>()
        .with::<SiteSettingsRecord>()
        .with::<NavigationMenuRecord>()
}

fn region_paths(region: &str) -> [CachePath; 3] {
    [
        CachePath::prefix(format!("/region/{region}")),
        CachePath::prefix(format!("{DESTINATION_PAGES}{region}/")),
        CachePath::prefix(format!("{DETAIL_PAGES}{region}/")),
    ]
}

/// Overview and detail pages of one destination. Without a region the
/// destination could sit under any region path, so every one is dropped.
fn destination_paths(region: Option<&str>, destination: &str) -> Vec<CachePath> {
    match region {
        Some(region) => vec![
            CachePath::prefix(format!("{DESTINATION_PAGES}{region}/{destination}/")),
            CachePath::prefix(format!("{DETAIL_PAGES}{region}/{destination}/")),
        ],
        None => vec![
            CachePath::prefix(DESTINATION_PAGES),
            CachePath::prefix(DETAIL_PAGES),
        ],
    }
}

impl CacheInvalidating for RegionRecord {
    const KIND: EntityKind = EntityKind::Region;

    fn invalidation_targets(&self, previous: Option<&Self>) -> InvalidationTarget {
        let mut paths: Vec<CachePath> = region_paths(&self.slug).into();
        if let Some(previous) = previous.filter(|previous| previous.slug != self.slug) {
            paths.extend(region_paths(&previous.slug));
        }
        paths.push(CachePath::prefix(TOURS_LISTING));
        InvalidationTarget::paths(paths)
    }
}

impl CacheInvalidating for DestinationRecord {
    const KIND: EntityKind = EntityKind::Destination;

    fn invalidation_targets(&self, previous: Option<&Self>) -> InvalidationTarget {
        let mut paths = destination_paths(self.region.as_deref(), &self.slug);
        if let Some(region) = self.region.as_deref() {
            paths.push(CachePath::prefix(format!("/region/{region}")));
        }

        if let Some(previous) = previous {
            paths.extend(destination_paths(previous.region.as_deref(), &previous.slug));
            if let Some(region) = previous.region.as_deref() {
                paths.push(CachePath::prefix(format!("/region/{region}")));
            }
        }

        InvalidationTarget::paths(paths)
    }
}

impl CacheInvalidating for DestinationDetailsRecord {
    const KIND: EntityKind = EntityKind::DestinationDetails;

    fn invalidation_targets(&self, previous: Option<&Self>) -> InvalidationTarget {
        let mut paths = destination_paths(self.region.as_deref(), &self.destination);
        if let Some(previous) = previous {
            paths.extend(destination_paths(
                previous.region.as_deref(),
                &previous.destination,
            ));
        }
        InvalidationTarget::paths(paths)
    }
}

impl CacheInvalidating for TourRecord {
    const KIND: EntityKind = EntityKind::Tour;

    /// Every tour page lists the tours closest in date, so a tour change
    /// reaches all of them.
    fn invalidation_targets(&self, previous: Option<&Self>) -> InvalidationTarget {
        let mut paths = vec![
            CachePath::prefix(TOUR_PAGES),
            CachePath::prefix(TOURS_LISTING),
            CachePath::exact(FRONT_PAGE),
        ];

        let previous_destinations = previous
            .map(|previous| previous.destinations.as_slice())
            .unwrap_or_default();
        for DestinationRef { slug, region } in self.destinations.iter().chain(previous_destinations)
        {
            paths.extend(destination_paths(region.as_deref(), slug));
        }

        InvalidationTarget::paths(paths)
    }
}

impl CacheInvalidating for ItineraryDayRecord {
    const KIND: EntityKind = EntityKind::ItineraryDay;

    fn invalidation_targets(&self, previous: Option<&Self>) -> InvalidationTarget {
        let current = CachePath::prefix(format!("{TOUR_PAGES}{}", self.tour));
        let moved_from = previous
            .filter(|previous| previous.tour != self.tour)
            .map(|previous| CachePath::prefix(format!("{TOUR_PAGES}{}", previous.tour)));
        InvalidationTarget::paths(std::iter::once(current).chain(moved_from))
    }
}

impl CacheInvalidating for ArticleRecord {
    const KIND: EntityKind = EntityKind::Article;

    fn invalidation_targets(&self, previous: Option<&Self>) -> InvalidationTarget {
        let mut paths = vec![
            CachePath::prefix(format!("/article/{}", self.slug)),
            CachePath::prefix(self.kind.listing_path()),
            CachePath::exact(FRONT_PAGE),
        ];

        if let Some(previous) = previous {
            if previous.slug != self.slug {
                paths.push(CachePath::prefix(format!("/article/{}", previous.slug)));
            }
            if previous.kind != self.kind {
                paths.push(CachePath::prefix(previous.kind.listing_path()));
            }
        }

        InvalidationTarget::paths(paths)
    }
}

impl CacheInvalidating for PageRecord {
    const KIND: EntityKind = EntityKind::Page;

    fn invalidation_targets(&self, previous: Option<&Self>) -> InvalidationTarget {
        let url = self.url();
        // The root page would otherwise expand to a whole-store prefix.
        let as_path = |url: String| {
            if url == FRONT_PAGE {
                CachePath::exact(url)
            } else {
                CachePath::prefix(url)
            }
        };

        let moved_from = previous
            .map(PageRecord::url)
            .filter(|previous_url| *previous_url != url)
            .map(as_path);
        InvalidationTarget::paths(std::iter::once(as_path(url)).chain(moved_from))
    }
}

impl CacheInvalidating for SiteSettingsRecord {
    const KIND: EntityKind = EntityKind::SiteSettings;

    fn invalidation_targets(&self, _previous: Option<&Self>) -> InvalidationTarget {
        InvalidationTarget::All
    }
}

impl CacheInvalidating for NavigationMenuRecord {
    const KIND: EntityKind = EntityKind::NavigationMenu;

    fn invalidation_targets(&self, _previous: Option<&Self>) -> InvalidationTarget {
        InvalidationTarget::All
    }
}

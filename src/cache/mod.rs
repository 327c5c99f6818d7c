//! Full-page cache.
//!
//! - **Store** keeps rendered HTML keyed by request path.
//! - **Gate** (`page_cache_layer`) answers eligible requests from the store
//!   and captures cacheable misses.
//! - **Coordinator** reacts to content writes by deleting the pages each
//!   entity declares it appears on, and purges the CDN edge.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! store = "postgres"
//! bypass_prefixes = ["/admin", "/static", "/media"]
//! session_cookie = "sessionid"
//! ```

pub mod cdn;
mod config;
mod coordinator;
mod eligibility;
mod events;
mod lock;
mod middleware;
mod minify;
mod registry;
mod response;
mod store;
mod targets;

pub use cdn::{CdnError, CdnPurger, CloudflareConfig, CloudflarePurger, PurgeScope};
pub use config::{
    CacheConfig, DEFAULT_BODY_LIMIT_BYTES, DEFAULT_BYPASS_PREFIXES, DEFAULT_SESSION_COOKIE,
};
pub use coordinator::{CdnOutcome, CoordinatorError, InvalidationCoordinator, InvalidationReport};
pub use eligibility::{
    BypassReason, Eligibility, RequestFacts, Viewer, evaluate, normalized_path,
};
pub use events::{ChangeKind, ContentEvent};
pub use middleware::{
    CacheState, PAGE_CACHE_HEADER, classify_viewer, page_cache_layer, viewer_from_cookies,
};
pub use minify::{MinifyError, minify_html};
pub use registry::{InvalidationRegistry, RegistryError};
pub use store::{CacheEntry, MemoryPageStore, PageStore, StoreError};
pub use targets::{CacheInvalidating, CachePath, InvalidationTarget};

pub(crate) use store::record_duplicates_removed;

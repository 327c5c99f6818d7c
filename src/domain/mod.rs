//! Content model of the site and the pages each record appears on.

pub mod entities;
pub mod invalidation;
pub mod types;

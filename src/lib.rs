//! Full-page HTML cache for a travel-agency content site.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;

//! HTTP handlers for generated collection, item and sub-resource endpoints.

pub mod collection;
pub(crate) mod common;
pub mod item;
pub(crate) mod params;
pub mod subresource;

//! Route construction: common endpoints plus one router per registered resource.

mod common;
mod resource;

pub use common::common_routes;
pub(crate) use common::not_found;
pub use resource::resource_routes;

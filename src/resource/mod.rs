//! Resource declarations and their registration.

pub mod descriptor;
pub mod model;
pub mod registry;

pub use descriptor::{Method, Resource, ResourceBuilder, SubResource};
pub use model::{DataRelation, Field, FieldType, Model, Pattern, ValidationRule};
pub use registry::{Embed, RegisteredResource, Registry, ResponseModel, CREATED, UPDATED};

//! Request-body validation shared by the write handlers.

mod validation;
pub use validation::RequestValidator;

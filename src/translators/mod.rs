//! Translation backends
//!
//! The request handlers resolve a job's backend selector through
//! [`TranslatorRegistry`]. HTTP endpoints are the stock backend; anything else
//! implementing [`Translator`](crate::core::Translator) can be registered too.

mod http;
mod registry;

pub use http::HttpTranslator;
pub use registry::TranslatorRegistry;

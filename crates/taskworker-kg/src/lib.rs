//! Batched knowledge-graph enrichment (spec §4.3).

pub mod batch;
pub mod client;
pub mod entity;

pub use batch::{batch_enrich, fetch_with_fallback, Mention};
pub use client::KgClient;
pub use entity::{is_allowed_instance_of, KgEntity, UserProvidedFallback, ALLOWED_INSTANCE_OF};

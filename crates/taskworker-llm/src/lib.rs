//! The language-model gateway: one interface, three backing variants
//! (spec §4.4).

pub mod cloud;
pub mod gateway;
pub mod hybrid;
pub mod local;
pub mod mock;
pub mod types;

pub use cloud::CloudBackend;
pub use gateway::LanguageModel;
pub use hybrid::HybridBackend;
pub use local::LocalBackend;
pub use mock::{is_placeholder_key, MockProvider};
pub use types::{
    approximate_tokens, render_transcript, ChatCompletion, Embedding, Message, Role, Usage,
    EMBEDDING_DIM,
};

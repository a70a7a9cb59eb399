//! Adapters for the pipeline's external collaborators: the repository
//! hosting API and the language-model API.

pub mod github;
pub mod llm;

pub use github::{
    is_near_duplicate, passes_inclusion_filter, suppress_near_duplicates, GitHubConfig,
    GitHubSource, RepositorySource, SourceError,
};
pub use llm::{ChatError, ChatMessage, ChatModel, ImageModel, OpenAiClient, OpenAiConfig};

pub const CRATE_NAME: &str = "folio-adapters";

// Translation collaborator. The pipeline talks to a `Translator` trait object
// so tests can substitute a canned translator for the HTTP client.

mod api_client;

pub use api_client::HttpTranslator;

use async_trait::async_trait;

use crate::core::errors::TranslationResult;
use crate::core::types::TranslationRequest;

/// Machine translation for one region's joined source text.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, request: TranslationRequest) -> TranslationResult<String>;

    /// Release any held resources. The default is a no-op.
    async fn destroy(&self) {}
}

/// Canned translator for tests: returns the configured output for every
/// request, or the source text prefixed with the target language when no
/// canned output is set.
#[derive(Debug, Default)]
pub struct MockTranslator {
    pub canned: Option<String>,
}

impl MockTranslator {
    pub fn returning(text: &str) -> Self {
        Self {
            canned: Some(text.to_string()),
        }
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(&self, request: TranslationRequest) -> TranslationResult<String> {
        Ok(self
            .canned
            .clone()
            .unwrap_or_else(|| format!("[{}] {}", request.to, request.text)))
    }
}

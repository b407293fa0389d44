use async_trait::async_trait;
use cito_types::CitoError;

use crate::{Request, Response};

// ---------------------------------------------------------------------------
// CompletionProvider
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &Request) -> Result<Response, CitoError>;
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// DynProvider
// ---------------------------------------------------------------------------

pub struct DynProvider(Box<dyn CompletionProvider>);

impl DynProvider {
    pub fn new(provider: impl CompletionProvider + 'static) -> Self {
        Self(Box::new(provider))
    }

    pub async fn complete(&self, request: &Request) -> Result<Response, CitoError> {
        self.0.complete(request).await
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn default_model(&self) -> &str {
        self.0.default_model()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

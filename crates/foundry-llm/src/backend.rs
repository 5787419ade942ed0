use std::sync::Arc;

use async_trait::async_trait;

use foundry_types::Result;

use crate::{Completion, CompletionRequest};

// ---------------------------------------------------------------------------
// ModelBackend
// ---------------------------------------------------------------------------

/// A text-completion backend: prompt in, text out.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// DynBackend
// ---------------------------------------------------------------------------

/// Shared, object-safe handle to a backend.
///
/// Cloning yields another handle to the same backend, so several agents can
/// share one HTTP client.
#[derive(Clone)]
pub struct DynBackend(Arc<dyn ModelBackend>);

impl DynBackend {
    pub fn new(backend: impl ModelBackend + 'static) -> Self {
        Self(Arc::new(backend))
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.0.complete(request).await
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn default_model(&self) -> &str {
        self.0.default_model()
    }
}

impl std::fmt::Debug for DynBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DynBackend").field(&self.name()).finish()
    }
}

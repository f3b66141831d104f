//! Named verification hook factories
//!
//! Bindings select their hook by tag. The registry is populated at process
//! startup and read when listeners and clusters build their contexts.

use crate::config::ExtensionParams;
use crate::error::TlsError;
use crate::hooks::Hook;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds a hook from a binding's extension parameters
pub trait HookFactory: Send + Sync {
    fn create_hook(&self, params: &ExtensionParams) -> Result<Hook, TlsError>;
}

impl<F> HookFactory for F
where
    F: Fn(&ExtensionParams) -> Result<Hook, TlsError> + Send + Sync,
{
    fn create_hook(&self, params: &ExtensionParams) -> Result<Hook, TlsError> {
        self(params)
    }
}

/// Maps extension tags to hook factories
#[derive(Default, Clone)]
pub struct HookRegistry {
    factories: HashMap<String, Arc<dyn HookFactory>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory closure under a tag
    pub fn register<F>(
        &mut self,
        tag: impl Into<String>,
        factory: F,
    ) -> Result<Option<Arc<dyn HookFactory>>, TlsError>
    where
        F: Fn(&ExtensionParams) -> Result<Hook, TlsError> + Send + Sync + 'static,
    {
        self.register_factory(tag, factory)
    }

    /// Register a factory under a tag.
    ///
    /// A later registration replaces an earlier one; the replaced factory is
    /// returned.
    pub fn register_factory<F>(
        &mut self,
        tag: impl Into<String>,
        factory: F,
    ) -> Result<Option<Arc<dyn HookFactory>>, TlsError>
    where
        F: HookFactory + 'static,
    {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(TlsError::EmptyExtensionType);
        }

        let previous = self.factories.insert(tag.clone(), Arc::new(factory));
        if previous.is_some() {
            warn!(extension = %tag, "TLS hook factory replaced");
        } else {
            debug!(extension = %tag, "TLS hook factory registered");
        }
        Ok(previous)
    }

    /// Hook for a binding. The empty tag yields the default hook.
    pub fn resolve(&self, tag: &str, params: &ExtensionParams) -> Result<Hook, TlsError> {
        if tag.is_empty() {
            return Ok(Hook::default());
        }

        let factory = self
            .factories
            .get(tag)
            .ok_or_else(|| TlsError::UnknownExtension(tag.to_string()))?;
        factory.create_hook(params)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort_unstable();
        f.debug_struct("HookRegistry").field("tags", &tags).finish()
    }
}

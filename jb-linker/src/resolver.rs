use std::sync::Arc;

use codegen::{SymbolIdentity, demangle};
use tracing::{debug, error, warn};

use crate::cache::SignatureCache;
use crate::error::{LinkerError, LinkerResult, ResolutionFailure};
use crate::logging::category_resolver;
use crate::runtime::{ClassRef, ManagedRuntime};

/// Finds the full descriptor of the managed method behind an exported native symbol.
pub struct SignatureResolver {
    runtime: Arc<dyn ManagedRuntime>,
    cache: SignatureCache,
}

impl SignatureResolver {
    pub fn new(runtime: Arc<dyn ManagedRuntime>, cache_capacity: usize) -> Self {
        Self {
            runtime,
            cache: SignatureCache::new(cache_capacity),
        }
    }

    pub fn runtime(&self) -> &dyn ManagedRuntime {
        self.runtime.as_ref()
    }

    pub fn cache(&self) -> &SignatureCache {
        &self.cache
    }

    pub fn resolve(&self, symbol: &str) -> LinkerResult<String> {
        if let Some(descriptor) = self.cache.get(symbol) {
            debug!("{} cache hit for {symbol}", category_resolver());
            return Ok(descriptor);
        }

        let identity = demangle(symbol).map_err(|err| {
            error!("{} failed to parse native symbol name {symbol}: {err}", category_resolver());
            LinkerError::resolution(symbol, ResolutionFailure::Demangle(err))
        })?;

        let descriptor = self.introspect(&identity).map_err(|reason| {
            error!(
                "{} {symbol} (class {}, method {}): {reason}",
                category_resolver(),
                identity.class_name,
                identity.method_name
            );
            LinkerError::resolution(symbol, reason)
        })?;

        self.cache.insert(symbol, &descriptor);
        Ok(descriptor)
    }

    fn introspect(&self, identity: &SymbolIdentity) -> Result<String, ResolutionFailure> {
        let class = self
            .find_class(&identity.class_descriptor())?
            .ok_or_else(|| ResolutionFailure::ClassNotFound {
                class: identity.class_name.clone(),
            })?;

        let runtime = self.runtime();
        let methods = runtime
            .declared_methods(class)
            .map_err(|err| ResolutionFailure::Introspection(err.to_string()))?;

        for &method in methods.iter() {
            let signature = match runtime.method_name_and_descriptor(method) {
                Ok(signature) => signature,
                Err(err) => {
                    warn!("{} skipping method {:#x}: {err}", category_resolver(), method.0);
                    continue;
                }
            };
            if signature.name.as_str() != identity.method_name {
                continue;
            }
            if let Some(short) = identity.short_signature.as_deref()
                && !signature.descriptor.contains(short)
            {
                continue;
            }
            return Ok(signature.descriptor.to_string());
        }

        Err(ResolutionFailure::MethodNotFound {
            class: identity.class_name.clone(),
            method: identity.method_name.clone(),
        })
    }

    fn find_class(&self, wanted: &str) -> Result<Option<ClassRef>, ResolutionFailure> {
        let runtime = self.runtime();
        let classes = runtime
            .loaded_classes()
            .map_err(|err| ResolutionFailure::Introspection(err.to_string()))?;

        for &class in classes.iter() {
            match runtime.class_descriptor(class) {
                Ok(descriptor) if descriptor.as_str() == wanted => return Ok(Some(class)),
                Ok(_) => {}
                Err(err) => {
                    warn!("{} skipping class {:#x}: {err}", category_resolver(), class.0);
                }
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for SignatureResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureResolver")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

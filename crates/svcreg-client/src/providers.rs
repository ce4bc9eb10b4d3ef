//! Provider cache.
//!
//! Each dependent instance keeps its own view of who provides the services
//! it requires. The view is fed only by patches from the registry and never
//! expires on its own.

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::collections::HashMap;
use svcreg_common::{Error, Patch, Result, ServiceName};
use tracing::debug;

/// Service name to provider URLs, with random selection.
pub struct ProviderCache {
    services: RwLock<HashMap<ServiceName, Vec<String>>>,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl ProviderCache {
    /// Creates an empty cache seeded from the OS.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Creates an empty cache drawing from `rng`.
    pub fn with_rng(rng: impl RngCore + Send + 'static) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            rng: Mutex::new(Box::new(rng)),
        }
    }

    /// Applies one patch.
    ///
    /// Added URLs are appended without deduplication. Each removed entry
    /// deletes the first exact URL match under its name, if any.
    pub fn update(&self, patch: &Patch) {
        let mut services = self.services.write();

        for entry in &patch.added {
            services
                .entry(entry.name.clone())
                .or_default()
                .push(entry.url.clone());
        }

        for entry in &patch.removed {
            if let Some(urls) = services.get_mut(&entry.name) {
                if let Some(index) = urls.iter().position(|url| *url == entry.url) {
                    urls.remove(index);
                }
            }
        }

        debug!(
            added = patch.added.len(),
            removed = patch.removed.len(),
            "Applied provider patch"
        );
    }

    /// Picks one provider of `name` uniformly at random.
    pub fn get(&self, name: &ServiceName) -> Result<String> {
        let services = self.services.read();
        match services.get(name) {
            Some(urls) if !urls.is_empty() => {
                let index = self.rng.lock().gen_range(0..urls.len());
                Ok(urls[index].clone())
            }
            _ => Err(Error::no_providers(name.clone())),
        }
    }

    /// Current providers of `name`, in arrival order.
    pub fn providers(&self, name: &ServiceName) -> Vec<String> {
        self.services
            .read()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Names with at least one known provider.
    pub fn service_names(&self) -> Vec<ServiceName> {
        let mut names: Vec<ServiceName> = self
            .services
            .read()
            .iter()
            .filter(|(_, urls)| !urls.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl Default for ProviderCache {
    fn default() -> Self {
        Self::new()
    }
}

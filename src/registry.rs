//! Service registry: loads, holds, and persists the service collection.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

use crate::config::{load_config, save_config, Config};
use crate::constants::WILDCARD_NAME;
use crate::error::ManagerError;
use crate::handler::RunningCache;
use crate::service::Service;

/// Keyed collection of services backed by a single configuration file.
/// Owned exclusively by the process that created it; only the coordination
/// bus is shared across OS processes.
pub struct ServiceRegistry {
    config_path: PathBuf,
    services: BTreeMap<String, Arc<Service>>,
    running_cache: Arc<RunningCache>,
}

impl ServiceRegistry {
    /// Loads and schema-validates the configuration eagerly; any structural
    /// violation is raised before a single service is built.
    pub fn load(config_path: impl Into<PathBuf>) -> Result<Self, ManagerError> {
        let config_path = config_path.into();
        let config = load_config(&config_path)?;
        let running_cache = Arc::new(RunningCache::new());
        let services = Self::build_services(&config, &running_cache);
        Ok(Self {
            config_path,
            services,
            running_cache,
        })
    }

    fn build_services(
        config: &Config,
        running_cache: &Arc<RunningCache>,
    ) -> BTreeMap<String, Arc<Service>> {
        config
            .services
            .iter()
            .map(|(name, service_config)| {
                (
                    name.clone(),
                    Arc::new(Service::from_config(name, service_config, running_cache)),
                )
            })
            .collect()
    }

    /// Re-parses the configuration file and replaces every service wholesale.
    /// On a parse or validation failure the previous collection is kept
    /// untouched.
    pub fn reload(&mut self) -> Result<(), ManagerError> {
        let config = load_config(&self.config_path)?;
        self.services = Self::build_services(&config, &self.running_cache);
        Ok(())
    }

    /// Path of the backing configuration file.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Services in registry iteration order (sorted by name).
    pub fn services(&self) -> impl Iterator<Item = &Arc<Service>> {
        self.services.values()
    }

    /// Looks a service up by its exact name.
    pub fn get(&self, name: &str) -> Option<&Arc<Service>> {
        self.services.get(name)
    }

    /// Expands one name token: the wildcard (case-insensitive) matches every
    /// service, anything else is an exact match. Zero matches is a user error.
    pub fn resolve_name(&self, token: &str) -> Result<Vec<String>, ManagerError> {
        let resolved: Vec<String> = self
            .services
            .keys()
            .filter(|name| {
                token.eq_ignore_ascii_case(WILDCARD_NAME) || token == name.as_str()
            })
            .cloned()
            .collect();

        if resolved.is_empty() {
            return Err(ManagerError::UnresolvedName(token.to_string()));
        }
        Ok(resolved)
    }

    /// Resolves several tokens, deduplicated, preserving first-seen order.
    pub fn resolve_names(&self, tokens: &[String]) -> Result<Vec<String>, ManagerError> {
        let mut resolved = Vec::new();
        for token in tokens {
            for name in self.resolve_name(token)? {
                if !resolved.contains(&name) {
                    resolved.push(name);
                }
            }
        }
        Ok(resolved)
    }

    /// Flips a service's enablement flag and persists immediately.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), ManagerError> {
        let service = self
            .services
            .get(name)
            .ok_or_else(|| ManagerError::ServiceNotFound(name.to_string()))?;

        let mut updated_config = service.to_config();
        updated_config.enabled = enabled;
        let replacement =
            Service::from_config(name, &updated_config, &self.running_cache);
        self.services.insert(name.to_string(), Arc::new(replacement));

        self.save_config()?;
        info!(
            "{} service: {name}",
            if enabled { "Enabled" } else { "Disabled" }
        );
        Ok(())
    }

    /// Removes a service and persists immediately.
    pub fn remove(&mut self, name: &str) -> Result<(), ManagerError> {
        if self.services.remove(name).is_none() {
            return Err(ManagerError::ServiceNotFound(name.to_string()));
        }
        self.save_config()
    }

    /// Serialises every current service back to the configuration file.
    pub fn save_config(&self) -> Result<(), ManagerError> {
        let config = Config {
            services: self
                .services
                .iter()
                .map(|(name, service)| (name.clone(), service.to_config()))
                .collect(),
        };
        save_config(&config, &self.config_path)
    }

    /// Force-invalidates the running-state cache so the next probe reflects
    /// current reality.
    pub fn invalidate_running_cache(&self) {
        self.running_cache.invalidate();
    }
}

// Live connection registry
//
// Holds the named connection profiles of the running process and the connection currently
// open for each. Temporary profiles are handed out as guards and removed when the guard drops.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::database::connection::{
    connect_with_timeout, ConnectError, ConnectionProfile, DbConnector, LiveConnection,
};
use crate::error::{InstallerError, Result};

#[derive(Default)]
struct RegistryInner {
    profiles: HashMap<String, ConnectionProfile>,
    connections: HashMap<String, Arc<dyn LiveConnection>>,
}

pub struct ConnectionRegistry {
    default_name: String,
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    /// Registry whose default profile is `default_name`.
    pub fn new(default_name: impl Into<String>, default_profile: ConnectionProfile) -> Arc<Self> {
        let default_name = default_name.into();
        let mut inner = RegistryInner::default();
        inner.profiles.insert(default_name.clone(), default_profile);
        Arc::new(Self {
            default_name,
            inner: Mutex::new(inner),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // A panic while holding the lock cannot leave the maps half-updated.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    pub fn profile(&self, name: &str) -> Option<ConnectionProfile> {
        self.lock().profiles.get(name).cloned()
    }

    pub fn default_profile(&self) -> Result<ConnectionProfile> {
        self.profile(&self.default_name)
            .ok_or_else(|| InstallerError::UnknownProfile(self.default_name.clone()))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.lock().profiles.contains_key(name)
    }

    pub fn has_connection(&self, name: &str) -> bool {
        self.lock().connections.contains_key(name)
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().profiles.keys().cloned().collect();
        names.sort();
        names
    }

    /// Register `profile` under `name` until the returned guard is dropped.
    ///
    /// The default profile can never be shadowed, and a name already in use is refused.
    pub fn register_temporary(
        self: &Arc<Self>,
        name: &str,
        profile: ConnectionProfile,
    ) -> Result<TemporaryProfileGuard> {
        if name == self.default_name {
            return Err(InstallerError::ProfileInUse(name.to_string()));
        }

        let mut inner = self.lock();
        if inner.profiles.contains_key(name) {
            return Err(InstallerError::ProfileInUse(name.to_string()));
        }
        inner.profiles.insert(name.to_string(), profile.clone());
        drop(inner);

        debug!(
            "[PHASE: database] [STEP: registry] Temporary profile '{}' registered ({})",
            name,
            profile.masked()
        );
        Ok(TemporaryProfileGuard {
            registry: Arc::clone(self),
            name: name.to_string(),
            profile,
        })
    }

    /// Apply `update` to a registered profile and return the new value.
    pub fn update_profile<F>(&self, name: &str, update: F) -> Result<ConnectionProfile>
    where
        F: FnOnce(&mut ConnectionProfile),
    {
        let mut inner = self.lock();
        let profile = inner
            .profiles
            .get_mut(name)
            .ok_or_else(|| InstallerError::UnknownProfile(name.to_string()))?;
        update(profile);
        Ok(profile.clone())
    }

    /// Drop and close the open connection for `name`, if any.
    pub async fn purge(&self, name: &str) {
        let removed = self.lock().connections.remove(name);
        if let Some(conn) = removed {
            conn.close().await;
            info!(
                "[PHASE: database] [STEP: registry] Connection '{}' purged",
                name
            );
        }
    }

    /// Open a fresh connection for `name` using its current profile.
    pub async fn reconnect(&self, name: &str, connector: &dyn DbConnector) -> Result<()> {
        let profile = self
            .profile(name)
            .ok_or_else(|| InstallerError::UnknownProfile(name.to_string()))?;

        let conn = connect_with_timeout(connector, &profile)
            .await
            .map_err(|e: ConnectError| {
                warn!(
                    "[PHASE: database] [STEP: registry] Reconnect of '{}' failed: {}",
                    name, e.internal_details
                );
                InstallerError::Connect(e.user_message)
            })?;

        let previous = self
            .lock()
            .connections
            .insert(name.to_string(), Arc::from(conn));
        if let Some(old) = previous {
            old.close().await;
        }

        info!(
            "[PHASE: database] [STEP: registry] Connection '{}' re-established ({})",
            name,
            profile.masked()
        );
        Ok(())
    }

    fn release(&self, name: &str) -> Option<Arc<dyn LiveConnection>> {
        let mut inner = self.lock();
        inner.profiles.remove(name);
        inner.connections.remove(name)
    }
}

/// A registered temporary profile; dropping it unregisters the profile.
pub struct TemporaryProfileGuard {
    registry: Arc<ConnectionRegistry>,
    name: String,
    profile: ConnectionProfile,
}

impl TemporaryProfileGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn profile(&self) -> &ConnectionProfile {
        &self.profile
    }
}

impl Drop for TemporaryProfileGuard {
    fn drop(&mut self) {
        if self.registry.release(&self.name).is_some() {
            // Connections are closed by their users before the guard drops; this one was not.
            warn!(
                "[PHASE: database] [STEP: registry] Temporary profile '{}' still had an open connection at release",
                self.name
            );
        }
        debug!(
            "[PHASE: database] [STEP: registry] Temporary profile '{}' released",
            self.name
        );
    }
}

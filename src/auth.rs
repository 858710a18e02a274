// 🔑 Authorization - API key privileges with an advisory cache
//
// The cache only remembers keys that already verified. A miss, an expired
// entry or a poisoned lock all fall through to the store. Deactivating a key
// through the authorizer evicts it from the cache at once.

use crate::db::{CatalogStore, StoredKey};
use crate::error::{CatalogError, CatalogResult};
use crate::telemetry::censor_key;
use crate::versioned::Actor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Privilege {
    Read,
    ReadWrite,
}

impl Privilege {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privilege::Read => "read",
            Privilege::ReadWrite => "readWrite",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "read" => Some(Privilege::Read),
            "readWrite" => Some(Privilege::ReadWrite),
            _ => None,
        }
    }

    /// `readWrite` implies `read`.
    pub fn allows(&self, required: Privilege) -> bool {
        *self >= required
    }
}

/// Who is calling and what they may do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub actor: Actor,
    pub privilege: Privilege,
}

impl Principal {
    /// How this caller is recorded as issuer or deactivator of a key.
    pub fn label(&self) -> String {
        match &self.actor {
            Actor::Admin => "admin".to_string(),
            Actor::Key(key) => censor_key(key),
        }
    }
}

/// A newly generated key. The plaintext is only ever returned here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedKey {
    pub key: String,
    #[serde(flatten)]
    pub record: StoredKey,
}

// ============================================================================
// KEY CACHE
// ============================================================================

pub struct KeyCache {
    entries: RwLock<HashMap<String, (Privilege, Instant)>>,
    ttl: Duration,
}

impl KeyCache {
    pub fn new(ttl: Duration) -> Self {
        KeyCache {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<Privilege> {
        let entries = self.entries.read().ok()?;
        entries
            .get(key)
            .filter(|(_, stored_at)| stored_at.elapsed() < self.ttl)
            .map(|(privilege, _)| *privilege)
    }

    pub fn insert(&self, key: &str, privilege: Privilege) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.to_string(), (privilege, Instant::now()));
        }
    }

    pub fn forget(&self, key: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for KeyCache {
    fn default() -> Self {
        KeyCache::new(DEFAULT_CACHE_TTL)
    }
}

// ============================================================================
// AUTHORIZER
// ============================================================================

pub struct Authorizer {
    store: CatalogStore,
    master_key: Option<String>,
    cache: KeyCache,
}

impl Authorizer {
    pub fn new(store: CatalogStore, master_key: Option<String>) -> Self {
        Authorizer {
            store,
            master_key: master_key.filter(|k| !k.is_empty()),
            cache: KeyCache::default(),
        }
    }

    pub fn with_cache(mut self, cache: KeyCache) -> Self {
        self.cache = cache;
        self
    }

    /// Resolve `key` to a principal holding at least `required`.
    pub fn authorize(&self, key: Option<&str>, required: Privilege) -> CatalogResult<Principal> {
        let key = key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CatalogError::Unauthorized("An API key is required.".into()))?;

        if self.master_key.as_deref() == Some(key) {
            return Ok(Principal {
                actor: Actor::Admin,
                privilege: Privilege::ReadWrite,
            });
        }

        let privilege = match self.cache.get(key) {
            Some(privilege) => privilege,
            None => self.verify(key)?,
        };

        if !privilege.allows(required) {
            return Err(CatalogError::Forbidden(format!(
                "This API key does not have the {} privilege.",
                required.as_str()
            )));
        }

        Ok(Principal {
            actor: Actor::key(key),
            privilege,
        })
    }

    fn verify(&self, key: &str) -> CatalogResult<Privilege> {
        debug!(key = %censor_key(key), "verifying API key against store");
        match self.store.find_api_key(key)? {
            Some(stored) if stored.active => {
                self.cache.insert(key, stored.privilege);
                Ok(stored.privilege)
            }
            _ => {
                self.cache.forget(key);
                Err(CatalogError::Unauthorized("Invalid API key.".into()))
            }
        }
    }

    pub fn cache(&self) -> &KeyCache {
        &self.cache
    }

    // ------------------------------------------------------------------------
    // Key management
    // ------------------------------------------------------------------------

    /// Generate and store a new key. Only the admin picks the privilege;
    /// keys minted by anyone else are read-only.
    pub fn issue_key(
        &self,
        caller: &Principal,
        requested: Option<Privilege>,
        issued_for: Option<&str>,
    ) -> CatalogResult<IssuedKey> {
        let privilege = if caller.actor.is_admin() {
            requested.unwrap_or(Privilege::Read)
        } else {
            Privilege::Read
        };
        let key = Uuid::new_v4().simple().to_string();
        let record = self
            .store
            .create_api_key(&key, privilege, &caller.label(), issued_for)?;
        info!(
            key = %record.key_hint,
            privilege = privilege.as_str(),
            issuer = %caller.label(),
            "API key issued"
        );
        Ok(IssuedKey { key, record })
    }

    /// Deactivate `key` and drop it from the cache.
    pub fn deactivate_key(&self, caller: &Principal, key: &str) -> CatalogResult<()> {
        let key = key.trim();
        if !self.store.deactivate_api_key(key, &caller.label())? {
            return Err(CatalogError::not_found(format!("Key {} not found.", censor_key(key))));
        }
        self.cache.forget(key);
        info!(key = %censor_key(key), by = %caller.label(), "API key deactivated");
        Ok(())
    }

    /// Stored key metadata: one key when `check_key` is given, else all. Admin only.
    pub fn key_info(&self, caller: &Principal, check_key: Option<&str>) -> CatalogResult<Vec<StoredKey>> {
        if !caller.actor.is_admin() {
            return Err(CatalogError::Forbidden(
                "Only the admin key can view key information.".into(),
            ));
        }
        match check_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => self
                .store
                .find_api_key(key)?
                .map(|stored| vec![stored])
                .ok_or_else(|| CatalogError::not_found(format!("Key {} not found.", censor_key(key)))),
            None => self.store.list_api_keys(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authorizer() -> (CatalogStore, Authorizer) {
        let store = CatalogStore::open_in_memory().unwrap();
        store.insert_api_key("reader", Privilege::Read, None).unwrap();
        store.insert_api_key("writer", Privilege::ReadWrite, Some("ops")).unwrap();
        let auth = Authorizer::new(store.clone(), Some("master".into()));
        (store, auth)
    }

    #[test]
    fn test_master_key_is_admin() {
        let (_, auth) = authorizer();
        let principal = auth.authorize(Some("master"), Privilege::ReadWrite).unwrap();
        assert_eq!(principal.actor, Actor::Admin);
        assert_eq!(principal.actor.to_string(), "admin");
    }

    #[test]
    fn test_missing_and_unknown_keys_are_unauthorized() {
        let (_, auth) = authorizer();
        assert_eq!(auth.authorize(None, Privilege::Read).unwrap_err().status_code(), 401);
        assert_eq!(auth.authorize(Some("  "), Privilege::Read).unwrap_err().status_code(), 401);
        assert_eq!(auth.authorize(Some("nope"), Privilege::Read).unwrap_err().status_code(), 401);
    }

    #[test]
    fn test_read_key_cannot_write() {
        let (_, auth) = authorizer();
        assert!(auth.authorize(Some("reader"), Privilege::Read).is_ok());
        let err = auth.authorize(Some("reader"), Privilege::ReadWrite).unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert!(auth.authorize(Some("writer"), Privilege::ReadWrite).is_ok());
    }

    #[test]
    fn test_cache_miss_reverifies_against_store() {
        let (store, auth) = authorizer();
        assert!(auth.cache().is_empty());
        let principal = auth.authorize(Some("writer"), Privilege::Read).unwrap();
        assert_eq!(principal.actor, Actor::key("writer"));
        assert_eq!(auth.cache().len(), 1);

        // Expired entries are misses, so a deactivated key stops working.
        let auth = Authorizer::new(store.clone(), None).with_cache(KeyCache::new(Duration::ZERO));
        auth.authorize(Some("writer"), Privilege::Read).unwrap();
        store.deactivate_api_key("writer", "admin").unwrap();
        assert!(auth.authorize(Some("writer"), Privilege::Read).is_err());
    }

    #[test]
    fn test_only_admin_picks_issued_privilege() {
        let (_, auth) = authorizer();
        let admin = auth.authorize(Some("master"), Privilege::ReadWrite).unwrap();
        let writer = auth.authorize(Some("writer"), Privilege::ReadWrite).unwrap();

        let by_admin = auth.issue_key(&admin, Some(Privilege::ReadWrite), Some("ops")).unwrap();
        assert_eq!(by_admin.key.len(), 32);
        assert_eq!(by_admin.record.privilege, Privilege::ReadWrite);
        assert_eq!(by_admin.record.issuer.as_deref(), Some("admin"));
        assert!(auth.authorize(Some(&by_admin.key), Privilege::ReadWrite).is_ok());

        let by_writer = auth.issue_key(&writer, Some(Privilege::ReadWrite), None).unwrap();
        assert_eq!(by_writer.record.privilege, Privilege::Read);
        assert_eq!(by_writer.record.issuer, Some(censor_key("writer")));
        assert_ne!(by_writer.key, by_admin.key);
    }

    #[test]
    fn test_deactivation_evicts_cached_key() {
        let (_, auth) = authorizer();
        let admin = auth.authorize(Some("master"), Privilege::ReadWrite).unwrap();
        auth.authorize(Some("writer"), Privilege::Read).unwrap();
        assert_eq!(auth.cache().get("writer"), Some(Privilege::ReadWrite));

        auth.deactivate_key(&admin, "writer").unwrap();
        assert_eq!(auth.cache().get("writer"), None);
        assert_eq!(auth.authorize(Some("writer"), Privilege::Read).unwrap_err().status_code(), 401);
        assert_eq!(auth.deactivate_key(&admin, "missing").unwrap_err().status_code(), 404);
    }

    #[test]
    fn test_key_info_is_admin_only() {
        let (_, auth) = authorizer();
        let admin = auth.authorize(Some("master"), Privilege::ReadWrite).unwrap();
        let writer = auth.authorize(Some("writer"), Privilege::ReadWrite).unwrap();

        assert_eq!(auth.key_info(&writer, None).unwrap_err().status_code(), 403);
        assert_eq!(auth.key_info(&admin, None).unwrap().len(), 2);
        let one = auth.key_info(&admin, Some("reader")).unwrap();
        assert_eq!(one[0].privilege, Privilege::Read);
        assert_eq!(auth.key_info(&admin, Some("nope")).unwrap_err().status_code(), 404);
    }
}

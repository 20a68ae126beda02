//! Cabinet resolution.
//!
//! Maps a device event's `(email, device_id)` pair onto a user and one of
//! their cabinets. Only the registration feed may create a cabinet;
//! telemetry for an unknown device is dropped by the caller so malformed
//! traffic cannot spawn orphan cabinets.

use std::sync::Arc;

use cabio_core::time::now_millis;
use cabio_storage::{Cabinet, Provisioned, Stores, User};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;

/// Resolver over the persistent stores.
#[derive(Clone)]
pub struct CabinetResolver {
    stores: Arc<Stores>,
}

impl CabinetResolver {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }

    /// Look up the user and cabinet for a device event.
    ///
    /// Unknown users resolve to `None` silently: devices often report
    /// before their owner finishes registration. Unknown cabinets also
    /// resolve to `None`; the caller decides whether that deserves a
    /// warning (it does everywhere except the registration path).
    pub fn resolve(&self, email: &str, device_id: &str) -> Result<Option<(User, Cabinet)>> {
        let user = match self.stores.users.find_by_email(email)? {
            Some(user) => user,
            None => return Ok(None),
        };
        let cabinet = match self.stores.cabinets.find_by_device(&user.id, device_id)? {
            Some(cabinet) => cabinet,
            None => return Ok(None),
        };
        Ok(Some((user, cabinet)))
    }

    /// Registration path: create a cabinet for a newly announced device.
    ///
    /// The new cabinet is named `Cabinet <n+1>` after the user's current
    /// count, with the default board and an empty description. Racing
    /// provisioning events are settled by the store's insert-if-vacant
    /// transaction; the loser receives the winner's row as a success.
    pub fn provision(&self, email: &str, device_id: &str) -> Result<Option<Cabinet>> {
        let user = match self.stores.users.find_by_email(email)? {
            Some(user) => user,
            None => {
                warn!(email, "no user found for device registration");
                return Ok(None);
            }
        };

        let count = self.stores.cabinets.count_for_user(&user.id)?;
        let now = now_millis();
        let candidate = Cabinet {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            name: format!("Cabinet {}", count + 1),
            description: String::new(),
            board: Default::default(),
            device_id: Some(device_id.to_string()),
            created_at: now,
            updated_at: now,
        };

        match self.stores.cabinets.create_if_absent(candidate)? {
            Provisioned::Created(cabinet) => {
                info!(
                    email,
                    device_id,
                    name = %cabinet.name,
                    "created cabinet for newly announced device"
                );
                Ok(Some(cabinet))
            }
            Provisioned::Existing(cabinet) => Ok(Some(cabinet)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cabio_storage::Role;
    use tempfile::TempDir;

    fn seed_user(stores: &Stores) {
        stores
            .users
            .create(&User {
                id: "u1".to_string(),
                username: "alice".to_string(),
                fullname: "Alice".to_string(),
                email: "a@example.com".to_string(),
                password_hash: "hash".to_string(),
                role: Role::User,
                broker_username: Some("aio".to_string()),
                broker_key: Some("key".to_string()),
                phone_number: None,
                refresh_token: None,
                created_at: 0,
            })
            .unwrap();
    }

    #[test]
    fn test_unknown_user_is_silent_none() {
        let dir = TempDir::new().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        let resolver = CabinetResolver::new(stores);

        assert!(resolver
            .resolve("ghost@example.com", "dev-1")
            .unwrap()
            .is_none());
        assert!(resolver
            .provision("ghost@example.com", "dev-1")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_resolve_does_not_create() {
        let dir = TempDir::new().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        seed_user(&stores);
        let resolver = CabinetResolver::new(stores.clone());

        assert!(resolver.resolve("a@example.com", "dev-1").unwrap().is_none());
        assert_eq!(stores.cabinets.count_for_user("u1").unwrap(), 0);
    }

    #[test]
    fn test_provision_names_by_count() {
        let dir = TempDir::new().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        seed_user(&stores);
        let resolver = CabinetResolver::new(stores.clone());

        let first = resolver.provision("a@example.com", "dev-1").unwrap().unwrap();
        assert_eq!(first.name, "Cabinet 1");
        let second = resolver.provision("a@example.com", "dev-2").unwrap().unwrap();
        assert_eq!(second.name, "Cabinet 2");

        // Re-announcing an existing device is idempotent.
        let again = resolver.provision("a@example.com", "dev-1").unwrap().unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(stores.cabinets.count_for_user("u1").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_provision_creates_one_cabinet() {
        let dir = TempDir::new().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        seed_user(&stores);
        let resolver = CabinetResolver::new(stores.clone());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = resolver.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                resolver.provision("a@example.com", "dev-race").unwrap()
            }));
        }

        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            let cabinet = handle.await.unwrap().unwrap();
            ids.insert(cabinet.id);
        }

        assert_eq!(ids.len(), 1);
        assert_eq!(stores.cabinets.count_for_user("u1").unwrap(), 1);
    }

    #[test]
    fn test_resolve_after_provision() {
        let dir = TempDir::new().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        seed_user(&stores);
        let resolver = CabinetResolver::new(stores);

        resolver.provision("a@example.com", "dev-1").unwrap();
        let (user, cabinet) = resolver.resolve("a@example.com", "dev-1").unwrap().unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(cabinet.device_id.as_deref(), Some("dev-1"));
    }
}

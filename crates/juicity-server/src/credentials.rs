//! Client credential store

use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

use crate::error::ConfigError;

/// Immutable mapping from client identifier to shared secret.
///
/// Built once at startup and shared read-only by every connection.
#[derive(Clone, Default)]
pub struct CredentialStore {
    users: HashMap<Uuid, String>,
}

impl CredentialStore {
    /// Parse the configured `uuid -> password` map; any malformed identifier
    /// rejects the whole configuration.
    pub fn from_config(users: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let users = users
            .iter()
            .map(|(id, password)| {
                Uuid::parse_str(id)
                    .map(|uuid| (uuid, password.clone()))
                    .map_err(|source| ConfigError::InvalidUser {
                        id: id.clone(),
                        source,
                    })
            })
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(Self { users })
    }

    pub fn secret(&self, id: &Uuid) -> Option<&str> {
        self.users.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl FromIterator<(Uuid, String)> for CredentialStore {
    fn from_iter<T: IntoIterator<Item = (Uuid, String)>>(iter: T) -> Self {
        Self {
            users: iter.into_iter().collect(),
        }
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("users", &self.users.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_users() {
        let mut users = HashMap::new();
        users.insert("00000000-0000-0000-0000-000000000001".to_string(), "s1".to_string());
        users.insert("6F6BA1DE-4C3A-4E5F-8B1A-2D2A2F5C6E7D".to_string(), "s2".to_string());

        let store = CredentialStore::from_config(&users).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.secret(&Uuid::from_u128(1)), Some("s1"));
        let upper = Uuid::parse_str("6f6ba1de-4c3a-4e5f-8b1a-2d2a2f5c6e7d").unwrap();
        assert_eq!(store.secret(&upper), Some("s2"));
        assert_eq!(store.secret(&Uuid::nil()), None);
    }

    #[test]
    fn test_invalid_uuid_rejected() {
        let mut users = HashMap::new();
        users.insert("not-a-uuid".to_string(), "secret".to_string());
        let err = CredentialStore::from_config(&users).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUser { ref id, .. } if id == "not-a-uuid"));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let store: CredentialStore = [(Uuid::from_u128(7), "hunter2".to_string())].into_iter().collect();
        assert!(!format!("{:?}", store).contains("hunter2"));
    }
}

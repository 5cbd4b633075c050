//! CLI session persistence in the OS keychain.
//!
//! The stored session carries the role, identity and optional bearer
//! credential for one profile. The sync scope lives in the local store.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

use fleet_core::Session;
#[cfg(not(test))]
use keyring::Entry;

use crate::error::CliError;

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "fleet-cli";

#[derive(Debug, Clone)]
pub struct SessionStore {
    username: String,
}

impl SessionStore {
    pub fn new(profile_name: &str) -> Self {
        Self {
            username: format!("fleet_session:{profile_name}"),
        }
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(&self) -> Result<Entry, CliError> {
        Entry::new(KEYRING_SERVICE_NAME, &self.username)
            .map_err(|error| CliError::Session(error.to_string()))
    }

    /// Load the saved session, or the anonymous one when nobody is signed in.
    pub fn load_or_anonymous(&self) -> Result<Session, CliError> {
        Ok(self.load()?.unwrap_or_else(Session::anonymous))
    }

    #[cfg(not(test))]
    pub fn load(&self) -> Result<Option<Session>, CliError> {
        match self.entry()?.get_password() {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(CliError::Session(error.to_string())),
        }
    }

    #[cfg(test)]
    pub fn load(&self) -> Result<Option<Session>, CliError> {
        let guard = Self::test_store()
            .lock()
            .map_err(|error| CliError::Session(error.to_string()))?;
        guard
            .get(&self.username)
            .map(|raw| serde_json::from_str(raw))
            .transpose()
            .map_err(CliError::from)
    }

    #[cfg(not(test))]
    pub fn save(&self, session: &Session) -> Result<(), CliError> {
        let raw = serde_json::to_string(session)?;
        self.entry()?
            .set_password(&raw)
            .map_err(|error| CliError::Session(error.to_string()))
    }

    #[cfg(test)]
    pub fn save(&self, session: &Session) -> Result<(), CliError> {
        let raw = serde_json::to_string(session)?;
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| CliError::Session(error.to_string()))?;
        guard.insert(self.username.clone(), raw);
        Ok(())
    }

    #[cfg(not(test))]
    pub fn clear(&self) -> Result<(), CliError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(CliError::Session(error.to_string())),
        }
    }

    #[cfg(test)]
    pub fn clear(&self) -> Result<(), CliError> {
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| CliError::Session(error.to_string()))?;
        guard.remove(&self.username);
        Ok(())
    }
}

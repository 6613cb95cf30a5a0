//! External Google Calendar and Tasks reconciliation.

pub mod google_api;
pub mod google_codec;
pub mod links;
pub mod oauth;
pub mod reconciler;

pub use google_api::{GoogleApi, GoogleClient, GoogleEvent, GoogleTask, Page};
pub use links::LinkStore;
pub use oauth::{KeyringTokenSource, StaticTokenSource, TokenSource};
pub use reconciler::{LocalState, ReconcileReport, Reconciler};

/// Thin wrapper around the OS keyring for credential storage.
pub mod keyring_store {
    const SERVICE: &str = "offsync";

    pub fn get(key: &str) -> Result<Option<String>, Box<dyn std::error::Error>> {
        let entry = keyring::Entry::new(SERVICE, key)?;
        match entry.get_password() {
            Ok(pw) => Ok(Some(pw)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set(key: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
        let entry = keyring::Entry::new(SERVICE, key)?;
        entry.set_password(value)?;
        Ok(())
    }

    pub fn delete(key: &str) -> Result<(), Box<dyn std::error::Error>> {
        let entry = keyring::Entry::new(SERVICE, key)?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

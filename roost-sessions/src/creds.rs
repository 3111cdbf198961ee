//! Durable per-session credential storage.
//!
//! One directory per session id under a base directory, each holding a
//! `creds.json` with the opaque material issued by the messaging network.
//! Rotations must hit disk before `save` returns: losing one forces a full
//! re-pairing, so writes go through a temp file, fsync, then rename.

use crate::error::SessionResult;
use crate::session::SessionId;
use crate::transport::{CredentialDelta, Credentials};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

const CREDS_FILE: &str = "creds.json";

/// Filesystem-backed credential store.
pub struct CredentialStore {
    base: PathBuf,
}

impl CredentialStore {
    /// Create a store rooted at `base`. The directory is created lazily on
    /// first use.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn session_dir(&self, id: &SessionId) -> PathBuf {
        // Directory name is the literal session id string.
        self.base.join(id.as_str())
    }

    /// Load credential material for a session.
    ///
    /// Absence is the normal first-pairing condition, not an error: the
    /// storage location is initialized and empty credentials are returned.
    pub fn load(&self, id: &SessionId) -> SessionResult<Credentials> {
        let dir = self.session_dir(id);
        fs::create_dir_all(&dir)?;

        let path = dir.join(CREDS_FILE);
        if !path.exists() {
            return Ok(Credentials::default());
        }

        let raw = fs::read_to_string(&path)?;
        match serde_json::from_str(&raw) {
            Ok(creds) => Ok(creds),
            Err(e) => {
                // Corrupt material cannot be partially trusted; start over
                // with a fresh pairing rather than failing the session.
                tracing::warn!(
                    session = %id,
                    error = %e,
                    "corrupt credential file, treating as unpaired"
                );
                Ok(Credentials::default())
            }
        }
    }

    /// Merge a rotation delta into the stored material and persist it
    /// durably before returning.
    pub fn save(&self, id: &SessionId, delta: &CredentialDelta) -> SessionResult<()> {
        let mut creds = self.load(id)?;
        creds.merge(delta);
        self.write_durable(&self.session_dir(id), &creds)
    }

    /// Session ids that have stored credential material, for resuming after
    /// a process restart.
    pub fn stored_sessions(&self) -> SessionResult<Vec<SessionId>> {
        if !self.base.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.base)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if !entry.path().join(CREDS_FILE).exists() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                ids.push(SessionId::from(name));
            }
        }
        Ok(ids)
    }

    /// Remove a session's storage location. Called on authenticated logout,
    /// where the stored identity is revoked and must not be resumed.
    pub fn purge(&self, id: &SessionId) -> SessionResult<()> {
        let dir = self.session_dir(id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    fn write_durable(&self, dir: &Path, creds: &Credentials) -> SessionResult<()> {
        let tmp = dir.join(format!("{CREDS_FILE}.tmp"));
        let raw = serde_json::to_vec(creds).map_err(std::io::Error::other)?;

        let mut file = File::create(&tmp)?;
        file.write_all(&raw)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, dir.join(CREDS_FILE))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(key: &str, value: &str) -> CredentialDelta {
        let mut delta = CredentialDelta::default();
        delta.0.insert(key.into(), serde_json::json!(value));
        delta
    }

    #[test]
    fn load_missing_initializes_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        let id = SessionId::derive("user-1", "mybot");

        let creds = store.load(&id).unwrap();
        assert!(creds.is_empty());
        // Storage location was created.
        assert!(dir.path().join(id.as_str()).is_dir());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let id = SessionId::derive("user-1", "mybot");

        {
            let store = CredentialStore::new(dir.path());
            store.save(&id, &delta("noise_key", "abc")).unwrap();
            store.save(&id, &delta("signed_prekey", "def")).unwrap();
        }

        // Simulated process restart: fresh store over the same directory.
        let store = CredentialStore::new(dir.path());
        let creds = store.load(&id).unwrap();
        let raw = serde_json::to_value(&creds).unwrap();
        assert_eq!(raw["noise_key"], "abc");
        assert_eq!(raw["signed_prekey"], "def");
    }

    #[test]
    fn save_merges_rotations() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        let id = SessionId::derive("user-1", "mybot");

        store.save(&id, &delta("noise_key", "old")).unwrap();
        store.save(&id, &delta("noise_key", "new")).unwrap();

        let raw = serde_json::to_value(store.load(&id).unwrap()).unwrap();
        assert_eq!(raw["noise_key"], "new");
    }

    #[test]
    fn corrupt_file_treated_as_unpaired() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        let id = SessionId::derive("user-1", "mybot");

        let session_dir = dir.path().join(id.as_str());
        fs::create_dir_all(&session_dir).unwrap();
        fs::write(session_dir.join(CREDS_FILE), "{ not json").unwrap();

        assert!(store.load(&id).unwrap().is_empty());
    }

    #[test]
    fn stored_sessions_lists_paired_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        let paired = SessionId::derive("user-1", "paired");
        let unpaired = SessionId::derive("user-1", "unpaired");

        store.save(&paired, &delta("noise_key", "abc")).unwrap();
        store.load(&unpaired).unwrap(); // dir exists, no creds file

        let stored = store.stored_sessions().unwrap();
        assert_eq!(stored, vec![paired]);
    }

    #[test]
    fn stored_sessions_on_missing_base_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("nothing-here"));
        assert!(store.stored_sessions().unwrap().is_empty());
    }

    #[test]
    fn purge_removes_storage() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        let id = SessionId::derive("user-1", "mybot");

        store.save(&id, &delta("noise_key", "abc")).unwrap();
        store.purge(&id).unwrap();

        assert!(!dir.path().join(id.as_str()).exists());
        // Idempotent.
        store.purge(&id).unwrap();
    }
}

//! Session repository: secondary lookup store for session records
//!
//! The registry stays authoritative. A repository is a cache that the
//! admission layer writes after each registration and that can be rebuilt
//! from a registry snapshot at any time.

use crate::error::{RelayError, Result};
use crate::types::{Session, SessionIdentity};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Trait for persisting session records outside the registry
pub trait SessionRepository: Send + Sync {
    /// Insert or replace a session record
    fn save(&self, session: &Session) -> Result<()>;

    fn find_by_id(&self, identity: &SessionIdentity) -> Result<Option<Session>>;

    /// All records currently in the `Connected` state
    fn find_all_active(&self) -> Result<Vec<Session>>;

    /// Delete a record; no-op if absent
    fn delete_by_id(&self, identity: &SessionIdentity) -> Result<()>;

    fn exists_by_id(&self, identity: &SessionIdentity) -> Result<bool> {
        Ok(self.find_by_id(identity)?.is_some())
    }

    fn find_all(&self) -> Result<Vec<Session>>;

    /// Replace the whole record set with `sessions`
    ///
    /// Records not in `sessions` are deleted.
    fn replace_all(&self, sessions: &[Session]) -> Result<()> {
        let keep: HashSet<&SessionIdentity> = sessions.iter().map(|s| s.identity()).collect();
        for cached in self.find_all()? {
            if !keep.contains(cached.identity()) {
                self.delete_by_id(cached.identity())?;
            }
        }
        for session in sessions {
            self.save(session)?;
        }
        Ok(())
    }
}

/// In-memory repository
#[derive(Debug, Default)]
pub struct MemorySessionRepository {
    sessions: RwLock<HashMap<SessionIdentity, Session>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error(e: impl std::fmt::Display) -> RelayError {
    RelayError::Repository(format!("Failed to acquire repository lock: {}", e))
}

impl SessionRepository for MemorySessionRepository {
    fn save(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(lock_error)?;
        sessions.insert(session.identity().clone(), session.clone());
        Ok(())
    }

    fn find_by_id(&self, identity: &SessionIdentity) -> Result<Option<Session>> {
        let sessions = self.sessions.read().map_err(lock_error)?;
        Ok(sessions.get(identity).cloned())
    }

    fn find_all_active(&self) -> Result<Vec<Session>> {
        let sessions = self.sessions.read().map_err(lock_error)?;
        Ok(sessions.values().filter(|s| s.is_active()).cloned().collect())
    }

    fn delete_by_id(&self, identity: &SessionIdentity) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(lock_error)?;
        sessions.remove(identity);
        Ok(())
    }

    fn find_all(&self) -> Result<Vec<Session>> {
        let sessions = self.sessions.read().map_err(lock_error)?;
        Ok(sessions.values().cloned().collect())
    }

    fn replace_all(&self, sessions: &[Session]) -> Result<()> {
        let fresh = by_identity(sessions);
        *self.sessions.write().map_err(lock_error)? = fresh;
        Ok(())
    }
}

fn by_identity(sessions: &[Session]) -> HashMap<SessionIdentity, Session> {
    sessions
        .iter()
        .map(|s| (s.identity().clone(), s.clone()))
        .collect()
}

/// JSON file repository
///
/// Keeps the whole record set in one file. Every write rewrites the file
/// atomically (temp file + rename); a missing file reads as empty.
#[derive(Debug)]
pub struct FileSessionRepository {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    guard: RwLock<()>,
}

impl FileSessionRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<SessionIdentity, Session>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let json = std::fs::read_to_string(&self.path).map_err(|e| {
            RelayError::Repository(format!(
                "Failed to read session file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let records: Vec<Session> = serde_json::from_str(&json).map_err(|e| {
            RelayError::Repository(format!(
                "Failed to parse session file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(records
            .into_iter()
            .map(|s| (s.identity().clone(), s))
            .collect())
    }

    fn store(&self, sessions: &HashMap<SessionIdentity, Session>) -> Result<()> {
        let mut records: Vec<&Session> = sessions.values().collect();
        records.sort_by(|a, b| a.identity().cmp(b.identity()));
        let json = serde_json::to_string_pretty(&records)?;

        let tmp_path = self.path.with_extension("tmp");

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RelayError::Repository(format!(
                    "Failed to create repository directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        std::fs::write(&tmp_path, json).map_err(|e| {
            RelayError::Repository(format!(
                "Failed to write session file {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            RelayError::Repository(format!(
                "Failed to rename session file {} to {}: {}",
                tmp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!(path = %self.path.display(), count = records.len(), "Sessions saved");
        Ok(())
    }

    fn modify<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut HashMap<SessionIdentity, Session>),
    {
        let _guard = self.guard.write().map_err(lock_error)?;
        let mut sessions = self.load()?;
        apply(&mut sessions);
        self.store(&sessions)
    }

    fn read(&self) -> Result<HashMap<SessionIdentity, Session>> {
        let _guard = self.guard.read().map_err(lock_error)?;
        self.load()
    }
}

impl SessionRepository for FileSessionRepository {
    fn save(&self, session: &Session) -> Result<()> {
        self.modify(|sessions| {
            sessions.insert(session.identity().clone(), session.clone());
        })
    }

    fn find_by_id(&self, identity: &SessionIdentity) -> Result<Option<Session>> {
        Ok(self.read()?.remove(identity))
    }

    fn find_all_active(&self) -> Result<Vec<Session>> {
        Ok(self
            .read()?
            .into_values()
            .filter(|s| s.is_active())
            .collect())
    }

    fn delete_by_id(&self, identity: &SessionIdentity) -> Result<()> {
        self.modify(|sessions| {
            sessions.remove(identity);
        })
    }

    fn find_all(&self) -> Result<Vec<Session>> {
        Ok(self.read()?.into_values().collect())
    }

    /// One rewrite of the file; the previous content is never read
    fn replace_all(&self, sessions: &[Session]) -> Result<()> {
        let _guard = self.guard.write().map_err(lock_error)?;
        self.store(&by_identity(sessions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> SessionIdentity {
        SessionIdentity::of(value).unwrap()
    }

    fn connected(value: &str) -> Session {
        let mut session = Session::new(id(value));
        session.connect();
        session
    }

    fn temp_path() -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("a3s-relay-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("sessions.json");
        (dir, path)
    }

    #[test]
    fn test_memory_repository_save_find() {
        let repo = MemorySessionRepository::new();
        repo.save(&Session::new(id("a"))).unwrap();
        repo.save(&connected("b")).unwrap();

        assert!(repo.exists_by_id(&id("a")).unwrap());
        assert!(!repo.exists_by_id(&id("c")).unwrap());
        assert_eq!(repo.find_all().unwrap().len(), 2);

        let active = repo.find_all_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].identity().as_str(), "b");
    }

    #[test]
    fn test_memory_repository_overwrite_and_delete() {
        let repo = MemorySessionRepository::new();
        repo.save(&Session::new(id("a"))).unwrap();
        repo.save(&connected("a")).unwrap();
        assert!(repo.find_by_id(&id("a")).unwrap().unwrap().is_active());

        repo.delete_by_id(&id("a")).unwrap();
        repo.delete_by_id(&id("a")).unwrap();
        assert!(repo.find_by_id(&id("a")).unwrap().is_none());
    }

    #[test]
    fn test_file_repository_roundtrip() {
        let (dir, path) = temp_path();
        let repo = FileSessionRepository::new(&path);

        repo.save(&Session::new(id("a"))).unwrap();
        repo.save(&connected("b")).unwrap();
        assert!(path.exists());

        // A fresh handle sees the same records
        let reopened = FileSessionRepository::new(&path);
        assert_eq!(reopened.find_all().unwrap().len(), 2);
        assert!(reopened.find_by_id(&id("b")).unwrap().unwrap().is_active());
        assert_eq!(reopened.find_all_active().unwrap().len(), 1);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"identity\": \"a\""));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_repository_missing_file_is_empty() {
        let (_dir, path) = temp_path();
        let repo = FileSessionRepository::new(&path);
        assert!(repo.find_all().unwrap().is_empty());
        assert!(!repo.exists_by_id(&id("a")).unwrap());
    }

    #[test]
    fn test_file_repository_delete_leaves_no_tmp() {
        let (dir, path) = temp_path();
        let repo = FileSessionRepository::new(&path);

        repo.save(&Session::new(id("a"))).unwrap();
        repo.delete_by_id(&id("a")).unwrap();

        assert!(repo.find_all().unwrap().is_empty());
        assert!(!path.with_extension("tmp").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_repository_corrupt_file() {
        let (dir, path) = temp_path();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, "not json").unwrap();

        let repo = FileSessionRepository::new(&path);
        assert!(matches!(repo.find_all(), Err(RelayError::Repository(_))));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    /// Relies on the trait's default `replace_all`
    struct LoopingRepository(MemorySessionRepository);

    impl SessionRepository for LoopingRepository {
        fn save(&self, session: &Session) -> Result<()> {
            self.0.save(session)
        }
        fn find_by_id(&self, identity: &SessionIdentity) -> Result<Option<Session>> {
            self.0.find_by_id(identity)
        }
        fn find_all_active(&self) -> Result<Vec<Session>> {
            self.0.find_all_active()
        }
        fn delete_by_id(&self, identity: &SessionIdentity) -> Result<()> {
            self.0.delete_by_id(identity)
        }
        fn find_all(&self) -> Result<Vec<Session>> {
            self.0.find_all()
        }
    }

    fn assert_replaced(repo: &dyn SessionRepository) {
        repo.save(&Session::new(id("old"))).unwrap();
        repo.save(&Session::new(id("b"))).unwrap();

        repo.replace_all(&[Session::new(id("a")), connected("b")]).unwrap();

        let mut ids: Vec<String> = repo
            .find_all()
            .unwrap()
            .iter()
            .map(|s| s.identity().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(repo.find_by_id(&id("b")).unwrap().unwrap().is_active());

        repo.replace_all(&[]).unwrap();
        assert!(repo.find_all().unwrap().is_empty());
    }

    #[test]
    fn test_replace_all_memory() {
        assert_replaced(&MemorySessionRepository::new());
    }

    #[test]
    fn test_replace_all_default_loop() {
        assert_replaced(&LoopingRepository(MemorySessionRepository::new()));
    }

    #[test]
    fn test_replace_all_file() {
        let (dir, path) = temp_path();
        assert_replaced(&FileSessionRepository::new(&path));
        assert!(!path.with_extension("tmp").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_replace_all_overwrites_corrupt_file() {
        let (dir, path) = temp_path();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, "not json").unwrap();

        let repo = FileSessionRepository::new(&path);
        repo.replace_all(&[connected("a")]).unwrap();
        assert_eq!(repo.find_all_active().unwrap().len(), 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

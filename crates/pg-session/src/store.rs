use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::errors::{SessionError, SessionResult};
use crate::lock::{LockHolder, SessionLock, read_holder};
use crate::types::{Session, validate_session_id};

/// Repository-local hidden directory holding all pg state.
pub const STATE_DIR_NAME: &str = ".pg";
const SESSIONS_DIR_NAME: &str = "sessions";
const ACTIVE_FILE_NAME: &str = "active";
const SESSION_ID_PREFIX: &str = "pg-";

/// Anything the agent loop can checkpoint a session into.
pub trait SessionPersistence: Send + Sync {
    fn persist(&self, session: &Session) -> SessionResult<()>;
}

/// File-backed store rooted at `<repo>/.pg`.
///
/// Layout: `sessions/<id>.json`, `sessions/<id>.lock`, and an `active` pointer file.
#[derive(Clone, Debug)]
pub struct SessionStore {
    state_dir: PathBuf,
}

impl SessionStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn for_repo(repo_root: &Path) -> Self {
        Self::new(repo_root.join(STATE_DIR_NAME))
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn sessions_dir(&self) -> PathBuf {
        self.state_dir.join(SESSIONS_DIR_NAME)
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{id}.json"))
    }

    fn lock_path(&self, id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{id}.lock"))
    }

    fn active_path(&self) -> PathBuf {
        self.state_dir.join(ACTIVE_FILE_NAME)
    }

    /// Validates, then writes through a temporary file and rename.
    pub fn save(&self, session: &Session) -> SessionResult<()> {
        session.validate()?;
        let dir = self.sessions_dir();
        fs::create_dir_all(&dir)
            .map_err(|err| SessionError::io(format!("create {}", dir.display()), err))?;

        let raw = serde_json::to_vec_pretty(session)
            .map_err(|err| SessionError::Serialization(err.to_string()))?;
        let path = self.session_path(session.id());
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .map_err(|err| SessionError::io(format!("write {}", tmp.display()), err))?;
        fs::rename(&tmp, &path)
            .map_err(|err| SessionError::io(format!("rename {}", tmp.display()), err))?;
        info!(session_id = session.id(), "session saved");
        Ok(())
    }

    pub fn load(&self, id: &str) -> SessionResult<Session> {
        validate_session_id(id)?;
        let path = self.session_path(id);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SessionError::NotFound(id.to_string()));
            }
            Err(err) => return Err(SessionError::io(format!("read {}", path.display()), err)),
        };
        let session: Session = serde_json::from_slice(&raw)
            .map_err(|err| SessionError::Serialization(format!("{}: {err}", path.display())))?;
        session.validate()?;
        Ok(session)
    }

    pub fn exists(&self, id: &str) -> bool {
        validate_session_id(id).is_ok() && self.session_path(id).is_file()
    }

    /// Session ids on disk, `pg-<n>` ids in numeric order first.
    pub fn list(&self) -> SessionResult<Vec<String>> {
        let dir = self.sessions_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(SessionError::io(format!("read {}", dir.display()), err)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|err| SessionError::io(format!("read {}", dir.display()), err))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort_by_key(|id| session_sort_key(id));
        Ok(ids)
    }

    /// Removes the session file and any lock left behind.
    pub fn delete(&self, id: &str) -> SessionResult<()> {
        validate_session_id(id)?;
        let path = self.session_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SessionError::NotFound(id.to_string()));
            }
            Err(err) => return Err(SessionError::io(format!("remove {}", path.display()), err)),
        }
        let lock = self.lock_path(id);
        match fs::remove_file(&lock) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SessionError::io(format!("remove {}", lock.display()), err)),
        }
    }

    /// Fails immediately with [`SessionError::LockConflict`] if the lock file exists.
    pub fn acquire_lock(&self, id: &str) -> SessionResult<SessionLock> {
        validate_session_id(id)?;
        SessionLock::acquire(id, self.lock_path(id))
    }

    pub fn lock_holder(&self, id: &str) -> SessionResult<Option<LockHolder>> {
        validate_session_id(id)?;
        Ok(read_holder(&self.lock_path(id)))
    }

    pub fn active_session_id(&self) -> SessionResult<Option<String>> {
        let path = self.active_path();
        match fs::read_to_string(&path) {
            Ok(raw) => {
                let id = raw.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SessionError::io(format!("read {}", path.display()), err)),
        }
    }

    pub fn set_active_session_id(&self, id: &str) -> SessionResult<()> {
        validate_session_id(id)?;
        fs::create_dir_all(&self.state_dir)
            .map_err(|err| SessionError::io(format!("create {}", self.state_dir.display()), err))?;
        let path = self.active_path();
        fs::write(&path, id).map_err(|err| SessionError::io(format!("write {}", path.display()), err))
    }

    /// Resolves the active pointer to a loaded session.
    pub fn load_active(&self) -> SessionResult<Session> {
        let id = self.active_session_id()?.ok_or_else(|| {
            SessionError::NotFound("no active session (run 'pg start <goal>')".to_string())
        })?;
        self.load(&id)
    }

    /// Next `pg-<n>` id, starting from the session count and skipping taken ids.
    pub fn generate_session_id(&self) -> SessionResult<String> {
        let mut next = self.list()?.len() + 1;
        loop {
            let candidate = format!("{SESSION_ID_PREFIX}{next}");
            if !self.session_path(&candidate).exists() {
                return Ok(candidate);
            }
            next += 1;
        }
    }
}

impl SessionPersistence for SessionStore {
    fn persist(&self, session: &Session) -> SessionResult<()> {
        self.save(session)
    }
}

fn session_sort_key(id: &str) -> (u64, String) {
    let number = id
        .strip_prefix(SESSION_ID_PREFIX)
        .and_then(|suffix| suffix.parse::<u64>().ok())
        .unwrap_or(u64::MAX);
    (number, id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let store = SessionStore::for_repo(dir.path());
        (dir, store)
    }

    #[test]
    fn save_writes_pretty_json_without_leaving_temp_file() {
        let (dir, store) = store();
        let session = Session::new("pg-1", dir.path(), "refactor").expect("session");
        store.save(&session).expect("save should succeed");

        let path = dir.path().join(".pg/sessions/pg-1.json");
        let raw = fs::read_to_string(&path).expect("session file should exist");
        assert!(raw.contains("\n  \"goal\": \"refactor\""));
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(store.load("pg-1").expect("load"), session);
    }

    #[test]
    fn load_missing_session_is_not_found() {
        let (_dir, store) = store();
        let error = store.load("pg-9").expect_err("missing session should fail");
        assert!(matches!(error, SessionError::NotFound(id) if id == "pg-9"));
    }

    #[test]
    fn generated_ids_skip_existing_sessions() {
        let (dir, store) = store();
        assert_eq!(store.generate_session_id().expect("id"), "pg-1");

        store
            .save(&Session::new("pg-2", dir.path(), "goal").expect("session"))
            .expect("save");
        // One session on disk suggests pg-2, which is taken.
        assert_eq!(store.generate_session_id().expect("id"), "pg-3");
    }

    #[test]
    fn list_orders_sequential_ids_numerically() {
        let (dir, store) = store();
        for id in ["pg-10", "pg-2", "pg-1", "scratch"] {
            store
                .save(&Session::new(id, dir.path(), "goal").expect("session"))
                .expect("save");
        }
        assert_eq!(
            store.list().expect("list"),
            vec!["pg-1", "pg-2", "pg-10", "scratch"]
        );
    }

    #[test]
    fn delete_removes_session_and_lock() {
        let (dir, store) = store();
        store
            .save(&Session::new("pg-1", dir.path(), "goal").expect("session"))
            .expect("save");
        let lock = store.acquire_lock("pg-1").expect("lock");
        std::mem::forget(lock);

        store.delete("pg-1").expect("delete should succeed");
        assert!(!store.exists("pg-1"));
        assert!(store.lock_holder("pg-1").expect("holder").is_none());
        assert!(matches!(store.delete("pg-1"), Err(SessionError::NotFound(_))));
    }

    #[test]
    fn active_pointer_is_plain_text() {
        let (dir, store) = store();
        assert_eq!(store.active_session_id().expect("read"), None);
        store.set_active_session_id("pg-4").expect("write");
        assert_eq!(
            fs::read_to_string(dir.path().join(".pg/active")).expect("pointer file"),
            "pg-4"
        );
        assert_eq!(store.active_session_id().expect("read").as_deref(), Some("pg-4"));
        assert!(matches!(store.load_active(), Err(SessionError::NotFound(_))));
    }
}

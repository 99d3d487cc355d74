use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::errors::{SessionError, SessionResult};

/// Contents of a lock file: `<pid>\n<rfc3339 time>\n`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockHolder {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }

    fn to_file_contents(&self) -> String {
        format!("{}\n{}\n", self.pid, self.acquired_at.to_rfc3339())
    }

    fn parse(raw: &str) -> Option<Self> {
        let mut lines = raw.lines();
        let pid = lines.next()?.trim().parse().ok()?;
        let acquired_at = DateTime::parse_from_rfc3339(lines.next()?.trim())
            .ok()?
            .with_timezone(&Utc);
        Some(Self { pid, acquired_at })
    }

    fn describe(&self) -> String {
        format!("pid {} since {}", self.pid, self.acquired_at.to_rfc3339())
    }
}

/// Exclusive hold on one session. Released explicitly or when dropped.
#[derive(Debug)]
pub struct SessionLock {
    session_id: String,
    path: PathBuf,
    holder: LockHolder,
    released: bool,
}

impl SessionLock {
    pub(crate) fn acquire(session_id: &str, path: PathBuf) -> SessionResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                SessionError::io(format!("create lock directory {}", parent.display()), err)
            })?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(SessionError::LockConflict {
                    session_id: session_id.to_string(),
                    holder: describe_holder(&path),
                });
            }
            Err(err) => {
                return Err(SessionError::io(
                    format!("create lock file {}", path.display()),
                    err,
                ));
            }
        };

        let holder = LockHolder::current();
        if let Err(err) = file.write_all(holder.to_file_contents().as_bytes()) {
            if let Err(remove_err) = fs::remove_file(&path) {
                warn!(
                    path = %path.display(),
                    error = %remove_err,
                    "failed to remove partial lock file"
                );
            }
            return Err(SessionError::io(
                format!("write lock file {}", path.display()),
                err,
            ));
        }
        debug!(session_id, pid = holder.pid, "session lock acquired");

        Ok(Self {
            session_id: session_id.to_string(),
            path,
            holder,
            released: false,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> SessionResult<()> {
        self.released = true;
        remove_lock_file(&self.path)
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = remove_lock_file(&self.path) {
            warn!(session_id = %self.session_id, error = %err, "failed to release session lock");
        }
    }
}

fn remove_lock_file(path: &Path) -> SessionResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SessionError::io(
            format!("remove lock file {}", path.display()),
            err,
        )),
    }
}

pub(crate) fn read_holder(path: &Path) -> Option<LockHolder> {
    fs::read_to_string(path)
        .ok()
        .and_then(|raw| LockHolder::parse(&raw))
}

fn describe_holder(path: &Path) -> String {
    read_holder(path)
        .map(|holder| holder.describe())
        .unwrap_or_else(|| "unknown holder".to_string())
}

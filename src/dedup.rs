use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::platform::UserId;

#[derive(Default)]
struct DedupState {
    replied: BTreeMap<UserId, DateTime<Utc>>,
    /// Users with a reply currently being sent.
    in_flight: HashSet<UserId>,
}

/// Durable record of which users already received an auto-reply.
///
/// Every read and write goes through one mutex. The lock is never held
/// across I/O to the messaging platform; callers that need check-then-send
/// semantics use [`DedupStore::try_reserve`].
#[derive(Default)]
pub struct DedupStore {
    state: Mutex<DedupState>,
    save_lock: Mutex<()>,
}

/// Outcome of [`DedupStore::try_reserve`]
pub enum Reserve<'a> {
    Reserved(Reservation<'a>),
    AlreadyReplied,
    InFlight,
}

/// Exclusive right to reply to one user. Dropping it without
/// [`Reservation::commit`] leaves the user unmarked.
pub struct Reservation<'a> {
    store: &'a DedupStore,
    user: UserId,
}

impl Reservation<'_> {
    /// Record the reply.
    pub fn commit(self) {
        self.store.mark_replied(&self.user);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.store.state().in_flight.remove(&self.user);
    }
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot. A missing file yields an empty store; a malformed
    /// one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No responded users file at {}, starting empty", path.display());
                return Ok(Self::new());
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read responded users file: {}", path.display())
                })
            }
        };

        let replied: BTreeMap<UserId, DateTime<Utc>> = serde_json::from_str(&data)
            .with_context(|| format!("Malformed responded users file: {}", path.display()))?;

        Ok(Self {
            state: Mutex::new(DedupState {
                replied,
                in_flight: HashSet::new(),
            }),
            save_lock: Mutex::new(()),
        })
    }

    /// Like [`DedupStore::load`], but never fails. A malformed snapshot is
    /// moved aside to `<name>.corrupt-<timestamp>`; a file that cannot be read
    /// is left in place. Either way the store starts empty.
    pub fn load_or_quarantine(path: &Path) -> Self {
        match Self::load(path) {
            Ok(store) => store,
            Err(e) if e.downcast_ref::<serde_json::Error>().is_none() => {
                error!("Error reading responded users, leaving file in place: {:#}", e);
                Self::new()
            }
            Err(e) => {
                error!("Error loading responded users: {:#}", e);
                let backup = quarantine_path(path, Utc::now());
                match fs::rename(path, &backup) {
                    Ok(()) => warn!("Moved malformed snapshot to {}", backup.display()),
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => warn!(
                        "Could not move malformed snapshot {} aside: {}",
                        path.display(),
                        e
                    ),
                }
                Self::new()
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, DedupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub fn has_replied(&self, user: &UserId) -> bool {
        self.state().replied.contains_key(user)
    }

    /// Idempotent; re-marking only refreshes the timestamp.
    pub fn mark_replied(&self, user: &UserId) {
        self.state().replied.insert(user.clone(), Utc::now());
    }

    #[cfg(test)]
    pub fn replied_at(&self, user: &UserId) -> Option<DateTime<Utc>> {
        self.state().replied.get(user).copied()
    }

    pub fn len(&self) -> usize {
        self.state().replied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check and reserve in one critical section.
    pub fn try_reserve(&self, user: &UserId) -> Reserve<'_> {
        let mut state = self.state();
        if state.replied.contains_key(user) {
            return Reserve::AlreadyReplied;
        }
        if !state.in_flight.insert(user.clone()) {
            return Reserve::InFlight;
        }
        Reserve::Reserved(Reservation {
            store: self,
            user: user.clone(),
        })
    }

    /// Write the snapshot to a sibling temp file and rename it into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        // Snapshot under the save lock so files land in state order.
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let data = serde_json::to_string_pretty(&self.state().replied)
            .context("Failed to serialize responded users")?;

        write_atomic(path, data.as_bytes())
            .with_context(|| format!("Failed to write responded users file: {}", path.display()))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn quarantine_path(path: &Path, at: DateTime<Utc>) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".corrupt-{}", at.format("%Y%m%d%H%M%S")));
    path.with_file_name(name)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

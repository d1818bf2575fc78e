use std::collections::HashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use courier_core::{Session, SessionId};

use crate::error::StoreError;
use crate::sealed::Sealer;
use crate::store::SessionStore;

pub const CREDS_FILE: &str = "creds.json";

/// On-disk body of one key file. The name is lossy, so the body carries
/// the category and id verbatim.
#[derive(Deserialize)]
struct KeyRecord {
    category: String,
    id: String,
    value: Value,
}

#[derive(Serialize)]
struct KeyRecordRef<'a> {
    category: &'a str,
    id: &'a str,
    value: &'a Value,
}

/// File name for one key: `<category>-<id>.json` with `/` → `__`, `:` → `-`.
pub fn key_file_name(category: &str, id: &str) -> String {
    format!("{category}-{id}.json")
        .replace('/', "__")
        .replace(':', "-")
}

fn is_key_file(name: &str) -> bool {
    name != CREDS_FILE && name.ends_with(".json") && !name.starts_with('.')
}

fn corrupt(path: &Path, detail: impl Display) -> StoreError {
    StoreError::Corrupt {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

/// One directory per session under `root`: `creds.json` plus one file per key.
pub struct FileSessionStore {
    root: PathBuf,
    sealer: Option<Sealer>,
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl FileSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sealer: None,
            locks: DashMap::new(),
        }
    }

    /// Seal every file written from now on, and require sealed files on load.
    pub fn with_sealer(mut self, sealer: Sealer) -> Self {
        self.sealer = Some(sealer);
        self
    }

    pub fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn lock_for(&self, id: &SessionId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(id.clone()).or_default().value())
    }

    /// `Ok(None)` when the file does not exist; any other failure is `Corrupt`.
    async fn read_record<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StoreError> {
        let body = match tokio::fs::read_to_string(path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(corrupt(path, e)),
        };
        let plain = match &self.sealer {
            Some(sealer) => sealer.open(&body).map_err(|e| corrupt(path, e))?,
            None => body,
        };
        serde_json::from_str(&plain)
            .map(Some)
            .map_err(|e| corrupt(path, e))
    }

    /// Write via a temp file in the same directory, then rename over `path`.
    async fn write_atomic(&self, path: &Path, plaintext: &str) -> Result<(), StoreError> {
        let body = match &self.sealer {
            Some(sealer) => sealer.seal(plaintext)?,
            None => plaintext.to_owned(),
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{name}.{}.tmp", Uuid::now_v7()));

        let mut options = tokio::fs::OpenOptions::new();
        let _ = options.write(true).create_new(true);
        #[cfg(unix)]
        {
            let _ = options.mode(0o600);
        }

        let written = async {
            let mut file = options.open(&tmp).await?;
            file.write_all(body.as_bytes()).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn load_keys(&self, dir: &Path, session: &mut Session) -> Result<(), StoreError> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_key_file(&name) {
                continue;
            }
            let path = entry.path();
            match self.read_record::<KeyRecord>(&path).await {
                Ok(Some(record)) => {
                    let _ = session
                        .keys
                        .entry(record.category)
                        .or_default()
                        .insert(record.id, record.value);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "skipping unreadable key file"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    #[instrument(skip(self), fields(session_id = %id))]
    async fn load(&self, id: &SessionId) -> Result<Session, StoreError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let dir = self.session_dir(id);
        let creds = match self.read_record::<Map<String, Value>>(&dir.join(CREDS_FILE)).await {
            Ok(Some(creds)) => creds,
            Ok(None) => {
                debug!("no stored credentials, starting fresh session");
                return Ok(Session::fresh(id.clone()));
            }
            Err(e) => {
                warn!(error = %e, "stored credentials unusable, starting fresh session");
                return Ok(Session::fresh(id.clone()));
            }
        };

        let mut session = Session::fresh(id.clone());
        session.creds = creds;
        if let Err(e) = self.load_keys(&dir, &mut session).await {
            warn!(error = %e, "key directory unreadable, keeping the keys read so far");
        }
        debug!(
            registered = session.is_registered(),
            keys = session.key_count(),
            "session loaded"
        );
        Ok(session)
    }

    #[instrument(skip(self, session), fields(session_id = %session.id))]
    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        let lock = self.lock_for(&session.id);
        let _guard = lock.lock().await;

        let dir = self.session_dir(&session.id);
        tokio::fs::create_dir_all(&dir).await?;

        let creds = serde_json::to_string(&session.creds)?;
        self.write_atomic(&dir.join(CREDS_FILE), &creds).await?;

        let mut expected = HashSet::new();
        for (category, entries) in &session.keys {
            for (key_id, value) in entries {
                let name = key_file_name(category, key_id);
                let record = serde_json::to_string(&KeyRecordRef {
                    category,
                    id: key_id,
                    value,
                })?;
                self.write_atomic(&dir.join(&name), &record).await?;
                let _ = expected.insert(name);
            }
        }

        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_key_file(&name) && !expected.contains(&name) {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }

        debug!(keys = expected.len(), "session saved");
        Ok(())
    }

    #[instrument(skip(self), fields(session_id = %id))]
    async fn clear(&self, id: &SessionId) -> Result<(), StoreError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        match tokio::fs::remove_dir_all(self.session_dir(id)).await {
            Ok(()) => {
                debug!("session cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

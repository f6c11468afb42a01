//! The ref advertisement table and pack publishing.
//!
//! A refresh rebuilds the whole table from the shared repositories and
//! makes sure every advertised object has a pack in the repository's drive.
//! Publishing runs in the background; [`RepoState::wait_published`] joins it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use pear_git::GitBridge;
use pear_p2p::{drive_key, Drive, FsDrive};
use pear_types::{pack_path, ObjectId, RefTable};
use tokio::task::JoinHandle;

use crate::home::AppHome;
use crate::Result;

/// Drive handles, opened once per repository and reused across refreshes.
#[derive(Debug)]
pub struct Drives {
    home: AppHome,
    node_key: [u8; 32],
    open: DashMap<String, Arc<FsDrive>>,
    in_flight: Arc<DashSet<String>>,
}

impl Drives {
    pub fn new(home: AppHome, node_key: [u8; 32]) -> Self {
        Self {
            home,
            node_key,
            open: DashMap::new(),
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Drive of `repo`, opening it on first use.
    pub fn open(&self, repo: &str) -> Result<Arc<FsDrive>> {
        if let Some(drive) = self.open.get(repo) {
            return Ok(Arc::clone(drive.value()));
        }
        let drive = Arc::new(FsDrive::open(
            self.home.drive_path(repo),
            drive_key(&self.node_key, repo),
        )?);
        let entry = self.open.entry(repo.to_string()).or_insert(drive);
        Ok(Arc::clone(entry.value()))
    }

    /// An already opened drive, by its key.
    pub fn by_key(&self, key: &str) -> Option<Arc<FsDrive>> {
        self.open
            .iter()
            .find(|entry| entry.value().key().eq_ignore_ascii_case(key))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Number of open drives.
    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

/// Snapshot of what the daemon advertises.
#[derive(Debug, Default)]
pub struct RepoState {
    /// Ref table of every shared repository.
    pub refs_by_repo: BTreeMap<String, RefTable>,
    /// Repository owning each advertised object.
    pub ads_by_object_id: BTreeMap<ObjectId, String>,
    /// Drive key of every shared repository.
    pub drive_keys: BTreeMap<String, String>,
    publishes: Mutex<Vec<JoinHandle<()>>>,
}

impl RepoState {
    /// True when both states advertise the same objects.
    pub fn same_advertisement(&self, other: &RepoState) -> bool {
        self.ads_by_object_id.keys().eq(other.ads_by_object_id.keys())
    }

    /// Number of publish tasks not yet joined.
    pub fn pending_publishes(&self) -> usize {
        self.publishes.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Waits until every pack publish started by this refresh has ended.
    pub async fn wait_published(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.publishes.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "publish task failed");
            }
        }
    }

    /// Logs the advertised refs.
    pub fn log(&self) {
        for (repo, refs) in &self.refs_by_repo {
            for (name, oid) in refs {
                tracing::info!(%oid, r#ref = %name, %repo, "advertised");
            }
        }
    }
}

/// Rebuilds the advertisement table from the shared repositories in `home`.
///
/// Missing packs are published in the background. A repository whose refs
/// cannot be listed is logged and left out.
pub async fn refresh_state(home: &AppHome, git: &GitBridge, drives: &Drives) -> Result<RepoState> {
    let mut state = RepoState::default();
    let mut publishes = Vec::new();

    for repo in home.list(true)? {
        let drive = drives.open(&repo)?;
        let code = home.code_path(&repo);
        let refs = match git.list_refs(&code.to_string_lossy()).await {
            Ok(refs) => refs,
            Err(e) => {
                tracing::warn!(%repo, error = %e, "cannot list refs, skipping");
                continue;
            }
        };

        for oid in refs.values() {
            state.ads_by_object_id.insert(oid.clone(), repo.clone());
            let path = pack_path(oid);
            if drive.exists(&path).await? {
                continue;
            }
            let flight = format!("{}/{}", repo, oid);
            if !drives.in_flight.insert(flight.clone()) {
                continue;
            }
            publishes.push(spawn_publish(
                git.clone(),
                code.clone(),
                Arc::clone(&drive),
                oid.clone(),
                flight,
                Arc::clone(&drives.in_flight),
            ));
        }

        state.drive_keys.insert(repo.clone(), drive.key().to_string());
        state.refs_by_repo.insert(repo, refs);
    }

    *state.publishes.get_mut() = publishes;
    Ok(state)
}

fn spawn_publish(
    git: GitBridge,
    code: PathBuf,
    drive: Arc<FsDrive>,
    oid: ObjectId,
    flight: String,
    in_flight: Arc<DashSet<String>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match publish(&git, &code, &drive, &oid).await {
            Ok(bytes) => tracing::debug!(%oid, bytes, "pack published"),
            Err(e) => tracing::error!(%oid, error = %e, "pack publish failed"),
        }
        in_flight.remove(&flight);
    })
}

async fn publish(git: &GitBridge, code: &std::path::Path, drive: &FsDrive, oid: &ObjectId) -> Result<u64> {
    let path = pack_path(oid);
    let mut pack = git.upload_pack(code, oid, None).await?;
    let written = drive.write_from(&path, &mut pack).await?;
    if let Err(e) = pack.finish().await {
        drive.remove(&path).await?;
        return Err(e.into());
    }
    Ok(written)
}

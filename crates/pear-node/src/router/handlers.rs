//! Authorization and execution of each method.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use pear_acl::{AclRecord, AclStore, Role};
use pear_p2p::{Drive, FsDrive, DRIVE_CHUNK_SIZE};
use pear_types::{repo_name_from_url, short_branch, validate_branch_name, validate_repo_name, RequestBody};
use serde::Serialize;

use super::error::{RouterError, NOT_ALLOWED, NOT_ALLOWED_TO_ACCESS, NOT_ALLOWED_TO_PUSH, NOT_ALLOWED_TO_PUSH_BRANCH};
use super::method::Method;
use crate::context::AppContext;

type HandlerResult = Result<Bytes, RouterError>;

/// Who a request comes from.
#[derive(Debug, Clone)]
pub(crate) struct Caller {
    /// User id the auth scheme resolved.
    pub user: String,
    /// Dialed with this node's own key. The owner reads every repository,
    /// and its reads see a freshly rebuilt advertisement.
    pub owner: bool,
}

impl Caller {
    fn can_read(&self, record: &AclRecord) -> bool {
        self.owner || record.can_read(&self.user)
    }
}

fn json<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| RouterError::Storage(e.to_string()))
}

/// Runs `f` against the ACL store on the blocking pool.
async fn with_acl<T, F>(ctx: &AppContext, f: F) -> Result<T, RouterError>
where
    T: Send + 'static,
    F: FnOnce(&AclStore) -> pear_acl::Result<T> + Send + 'static,
{
    let store = ctx.acl_handle();
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| RouterError::Storage(e.to_string()))?
        .map_err(RouterError::from)
}

async fn record_of(ctx: &AppContext, repo: &str) -> Result<AclRecord, RouterError> {
    let repo = repo.to_string();
    with_acl(ctx, move |store| store.get_acl(&repo)).await
}

async fn fresh_state_for(ctx: &AppContext, caller: &Caller) {
    if caller.owner {
        if let Err(e) = ctx.refresh().await {
            tracing::warn!(error = %e, "refresh for owner failed");
        }
    }
}

fn target_repo(body: &RequestBody) -> Result<String, RouterError> {
    let repo = repo_name_from_url(&body.url);
    validate_repo_name(repo)?;
    Ok(repo.to_string())
}

/// Branch of a push-family request: the part of `data` before `#`.
pub(crate) fn target_branch(body: &RequestBody) -> Result<String, RouterError> {
    let data = body
        .data
        .as_deref()
        .ok_or_else(|| RouterError::Validation("missing branch".into()))?;
    let branch = short_branch(data.split('#').next().unwrap_or_default());
    validate_branch_name(branch)?;
    Ok(branch.to_string())
}

fn required_name(body: &RequestBody) -> Result<String, RouterError> {
    body.name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| RouterError::Validation("missing name".into()))
}

// ==================== Read side ====================

pub(crate) async fn get_repos(ctx: &AppContext, caller: &Caller) -> HandlerResult {
    fresh_state_for(ctx, caller).await;
    let state = ctx.state();
    let repos: Vec<String> = state.drive_keys.keys().cloned().collect();
    let records = with_acl(ctx, move |store| {
        repos
            .into_iter()
            .map(|repo| store.get_acl(&repo).map(|record| (repo, record)))
            .collect::<pear_acl::Result<Vec<_>>>()
    })
    .await?;

    let visible: BTreeMap<&str, &str> = records
        .iter()
        .filter(|(_, record)| caller.can_read(record))
        .filter_map(|(repo, _)| state.drive_keys.get_key_value(repo))
        .map(|(repo, key)| (repo.as_str(), key.as_str()))
        .collect();
    json(&visible)
}

pub(crate) async fn get_refs(ctx: &AppContext, caller: &Caller, body: &RequestBody) -> HandlerResult {
    let repo = target_repo(body)?;
    if !caller.can_read(&record_of(ctx, &repo).await?) {
        return Err(RouterError::Denied(NOT_ALLOWED));
    }
    fresh_state_for(ctx, caller).await;
    let state = ctx.state();
    let refs = state
        .refs_by_repo
        .get(&repo)
        .ok_or_else(|| RouterError::NotFound(repo.clone()))?;
    json(refs)
}

/// Resolves the drive a drive request names, checking read access to its repository.
async fn readable_drive(ctx: &AppContext, caller: &Caller, body: &RequestBody) -> Result<(Arc<FsDrive>, String), RouterError> {
    let repo = target_repo(body)?;
    if !caller.can_read(&record_of(ctx, &repo).await?) {
        return Err(RouterError::Denied(NOT_ALLOWED));
    }
    let key = required_name(body)?;
    let advertised = ctx.state().drive_keys.get(&repo).cloned();
    let drive = match advertised {
        Some(advertised) if advertised.eq_ignore_ascii_case(&key) => ctx.drives().by_key(&key),
        _ => None,
    }
    .ok_or_else(|| RouterError::NotFound(format!("drive {}", key)))?;
    let path = body
        .data
        .clone()
        .ok_or_else(|| RouterError::Validation("missing drive path".into()))?;
    Ok((drive, path))
}

pub(crate) async fn drive_exists(ctx: &AppContext, caller: &Caller, body: &RequestBody) -> HandlerResult {
    let (drive, path) = readable_drive(ctx, caller, body).await?;
    json(&drive.exists(&path).await?)
}

pub(crate) async fn drive_read(ctx: &AppContext, caller: &Caller, body: &RequestBody) -> HandlerResult {
    let (drive, path) = readable_drive(ctx, caller, body).await?;
    Ok(drive
        .read_chunk(&path, body.offset.unwrap_or(0), DRIVE_CHUNK_SIZE)
        .await?)
}

// ==================== Push side ====================

/// Checks that `user` may change `branch` according to `record`.
pub(crate) fn authorize_push(record: &AclRecord, user: &str, branch: &str) -> Result<(), RouterError> {
    if !record.has_role(user, Role::Contributor) {
        return Err(RouterError::Denied(NOT_ALLOWED_TO_PUSH));
    }
    if record.is_protected(branch) && !record.has_role(user, Role::Admin) {
        return Err(RouterError::Denied(NOT_ALLOWED_TO_PUSH_BRANCH));
    }
    Ok(())
}

pub(crate) async fn push(ctx: &AppContext, caller: &Caller, method: Method, body: &RequestBody) -> HandlerResult {
    let user = caller.user.as_str();
    let repo = target_repo(body)?;
    let branch = target_branch(body)?;
    authorize_push(&record_of(ctx, &repo).await?, user, &branch)?;
    if !ctx.home().is_initialized(&repo) {
        return Err(RouterError::NotFound(repo));
    }

    let code = ctx.home().code_path(&repo);
    let lock = ctx.repo_lock(&repo);
    let output = {
        let _guard = lock.lock().await;
        let git = ctx.git();
        let run = async {
            match method {
                Method::DeleteBranch => git.delete_branch(&code, &branch).await,
                Method::ForcePush => git.fetch_into_bare(&code, &body.url, &branch, true).await,
                _ => git.fetch_into_bare(&code, &body.url, &branch, false).await,
            }
        };
        tokio::time::timeout(ctx.config().git_timeout(), run)
            .await
            .map_err(|_| RouterError::Timeout)??
    };
    tracing::info!(%repo, %branch, %method, %user, "refs updated");

    if let Err(e) = ctx.refresh().await {
        tracing::warn!(error = %e, "refresh after push failed");
    }
    json(&output)
}

// ==================== ACL ====================

async fn administered_repo(ctx: &AppContext, caller: &Caller, body: &RequestBody) -> Result<String, RouterError> {
    let repo = target_repo(body)?;
    if !record_of(ctx, &repo).await?.has_role(&caller.user, Role::Admin) {
        return Err(RouterError::Denied(NOT_ALLOWED_TO_ACCESS));
    }
    if !ctx.home().is_initialized(&repo) {
        return Err(RouterError::NotFound(repo));
    }
    Ok(repo)
}

pub(crate) async fn get_acl(ctx: &AppContext, caller: &Caller, body: &RequestBody) -> HandlerResult {
    let repo = administered_repo(ctx, caller, body).await?;
    json(&record_of(ctx, &repo).await?)
}

pub(crate) async fn add_acl(ctx: &AppContext, caller: &Caller, body: &RequestBody) -> HandlerResult {
    let repo = administered_repo(ctx, caller, body).await?;
    let name = required_name(body)?;
    if body.branch {
        validate_branch_name(&name)?;
        let record = with_acl(ctx, move |store| store.add_protected_branch(&repo, &name)).await?;
        return json(&record.protected_branches);
    }
    let (grantee, role) = name
        .split_once(':')
        .map(|(grantee, role)| (grantee.to_string(), role.to_string()))
        .ok_or_else(|| RouterError::Validation("expected <user>:<role>".into()))?;
    if grantee.is_empty() {
        return Err(RouterError::Validation("missing user".into()));
    }
    tracing::info!(%repo, %grantee, %role, by = %caller.user, "granting access");
    let record = with_acl(ctx, move |store| store.grant_access_to_user(&repo, &grantee, &role)).await?;
    json(&record)
}

pub(crate) async fn del_acl(ctx: &AppContext, caller: &Caller, body: &RequestBody) -> HandlerResult {
    let repo = administered_repo(ctx, caller, body).await?;
    let name = required_name(body)?;
    if body.branch {
        let record = with_acl(ctx, move |store| store.remove_protected_branch(&repo, &name)).await?;
        return json(&record.protected_branches);
    }
    tracing::info!(%repo, revoked = %name, by = %caller.user, "revoking access");
    let record = with_acl(ctx, move |store| store.revoke_access_from_user(&repo, &name)).await?;
    json(&record)
}

//! `git pear acl`: local and remote ACL management.

use std::io::Write;
use std::path::Path;

use clap::ValueEnum;
use pear_acl::{AclRecord, AclStore};
use pear_node::{AppHome, Config, PeerSession};
use pear_types::PearUrl;

use crate::commands::{checkout, CliError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AclAction {
    Add,
    Remove,
    List,
}

/// What an ACL command operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclTarget {
    /// Users and roles; names are `<user>:<role>` when adding.
    User,
    /// Protected branches.
    Branch,
}

impl AclTarget {
    /// Target selected by the `--user` / `--branch` flags; exactly one must be set.
    pub fn from_flags(user: bool, branch: bool) -> Result<Self> {
        match (user, branch) {
            (true, false) => Ok(AclTarget::User),
            (false, true) => Ok(AclTarget::Branch),
            _ => Err(CliError::Usage("use exactly one of --user or --branch".into())),
        }
    }
}

/// Runs an ACL command against the repository at `path`, which is either a
/// local work tree or a `pear://` URL.
pub async fn run(
    home: &AppHome,
    action: AclAction,
    name: Option<&str>,
    target: AclTarget,
    path: &str,
    out: &mut dyn Write,
) -> Result<()> {
    let name = name.filter(|n| !n.is_empty());
    if PearUrl::is_pear_url(path) {
        let url = PearUrl::parse(path)?;
        let config = Config::load(&home.config_path())?;
        let session = PeerSession::open(home, &config, url).await?;
        return remote(&session, action, name, target, out).await;
    }

    let (_, repo) = checkout(Path::new(path))?;
    if !home.is_initialized(&repo) {
        return Err(CliError::NotInitialized(repo));
    }
    let store = AclStore::new(home.root());
    match target {
        AclTarget::User => local_user(&store, &repo, action, name, out),
        AclTarget::Branch => local_branch(&store, &repo, action, name, out),
    }
}

fn local_user(store: &AclStore, repo: &str, action: AclAction, name: Option<&str>, out: &mut dyn Write) -> Result<()> {
    let record = store.get_acl(repo)?;
    match action {
        AclAction::List => write_record(out, &record, name)?,
        AclAction::Add => {
            let (user, role) = user_role(name)?;
            if let Some(existing) = record.role_of(user) {
                return Err(CliError::Usage(format!(
                    "{} already has access to {} as {}",
                    user, repo, existing
                )));
            }
            store.grant_access_to_user(repo, user, role)?;
            writeln!(out, "Added {} to {} as {}", user, repo, role)?;
        }
        AclAction::Remove => {
            let user = name.ok_or_else(|| CliError::Usage("User not provided".into()))?;
            if record.role_of(user).is_none() {
                return Err(CliError::Usage(format!("{} does not have access to {}", user, repo)));
            }
            store.revoke_access_from_user(repo, user)?;
            writeln!(out, "Removed {} from {}", user, repo)?;
        }
    }
    Ok(())
}

fn local_branch(store: &AclStore, repo: &str, action: AclAction, name: Option<&str>, out: &mut dyn Write) -> Result<()> {
    let record = match action {
        AclAction::List => store.get_acl(repo)?,
        AclAction::Add => store.add_protected_branch(repo, branch(name)?)?,
        AclAction::Remove => store.remove_protected_branch(repo, branch(name)?)?,
    };
    write_summary(out, &record)?;
    Ok(())
}

async fn remote(
    session: &PeerSession,
    action: AclAction,
    name: Option<&str>,
    target: AclTarget,
    out: &mut dyn Write,
) -> Result<()> {
    tracing::info!(url = %session.url(), ?action, ?target, "remote acl");
    match (target, action) {
        (AclTarget::User, AclAction::List) => {
            let record = session.get_acl().await?;
            write_record(out, &record, name)?;
        }
        (AclTarget::User, AclAction::Add) => {
            let (user, role) = user_role(name)?;
            let record = session.grant(&format!("{}:{}", user, role)).await?;
            write_record(out, &record, None)?;
        }
        (AclTarget::User, AclAction::Remove) => {
            let user = name.ok_or_else(|| CliError::Usage("User not provided".into()))?;
            let record = session.revoke(user).await?;
            write_record(out, &record, None)?;
        }
        (AclTarget::Branch, AclAction::List) => {
            let record = session.get_acl().await?;
            write_summary(out, &record)?;
        }
        (AclTarget::Branch, AclAction::Add) => {
            let branches = session.protect(branch(name)?).await?;
            writeln!(out, "Protected Branch(s):\t{}", branches.join(", "))?;
        }
        (AclTarget::Branch, AclAction::Remove) => {
            let branches = session.unprotect(branch(name)?).await?;
            writeln!(out, "Protected Branch(s):\t{}", branches.join(", "))?;
        }
    }
    Ok(())
}

fn user_role(name: Option<&str>) -> Result<(&str, &str)> {
    let name = name.ok_or_else(|| CliError::Usage("User not provided".into()))?;
    match name.split_once(':') {
        Some((user, role)) if !user.is_empty() && !role.contains(':') => Ok((user, role)),
        _ => Err(CliError::Usage("Invalid role: expected <user>:<role>".into())),
    }
}

fn branch(name: Option<&str>) -> Result<&str> {
    name.ok_or_else(|| CliError::Usage("branch is not provided".into()))
}

fn write_summary(out: &mut dyn Write, record: &AclRecord) -> std::io::Result<()> {
    writeln!(out, "Repo Visibility:\t{}", record.visibility)?;
    writeln!(out, "Protected Branch(s):\t{}", record.protected_branches.join(", "))
}

/// Prints the record, or only `user`'s role when given.
fn write_record(out: &mut dyn Write, record: &AclRecord, user: Option<&str>) -> std::io::Result<()> {
    write_summary(out, record)?;
    if let Some(user) = user {
        let role = record.role_of(user).map(|r| r.to_string()).unwrap_or_else(|| "-".into());
        return writeln!(out, "User: {}\t{}", user, role);
    }
    writeln!(out, "User:\tRole:")?;
    for (user, role) in record.acl.iter() {
        writeln!(out, "{}\t{}", user, role)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{init, tests::fixture};

    async fn run_local(
        home: &AppHome,
        work: &Path,
        action: AclAction,
        name: Option<&str>,
        target: AclTarget,
    ) -> Result<String> {
        let mut out = Vec::new();
        run(home, action, name, target, &work.to_string_lossy(), &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_target_flags() {
        assert_eq!(AclTarget::from_flags(true, false).unwrap(), AclTarget::User);
        assert_eq!(AclTarget::from_flags(false, true).unwrap(), AclTarget::Branch);
        assert!(AclTarget::from_flags(true, true).is_err());
        assert!(AclTarget::from_flags(false, false).is_err());
    }

    #[test]
    fn test_user_role_parsing() {
        assert_eq!(user_role(Some("alice:admin")).unwrap(), ("alice", "admin"));
        assert!(user_role(Some("alice")).is_err());
        assert!(user_role(Some(":admin")).is_err());
        assert!(user_role(Some("a:b:c")).is_err());
        assert!(user_role(None).is_err());
    }

    #[tokio::test]
    async fn test_local_user_lifecycle() {
        let (_tmp, home, work) = fixture("foo");
        init(&home, &work, None).await.unwrap();

        let out = run_local(&home, &work, AclAction::Add, Some("alice:contributor"), AclTarget::User)
            .await
            .unwrap();
        assert_eq!(out, "Added alice to foo as contributor\n");

        let err = run_local(&home, &work, AclAction::Add, Some("alice:admin"), AclTarget::User)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "alice already has access to foo as contributor");

        let out = run_local(&home, &work, AclAction::List, None, AclTarget::User)
            .await
            .unwrap();
        assert_eq!(
            out,
            "Repo Visibility:\tpublic\nProtected Branch(s):\tmaster\nUser:\tRole:\nalice\tcontributor\n"
        );

        let out = run_local(&home, &work, AclAction::List, Some("alice"), AclTarget::User)
            .await
            .unwrap();
        assert!(out.ends_with("User: alice\tcontributor\n"));

        run_local(&home, &work, AclAction::Remove, Some("alice"), AclTarget::User)
            .await
            .unwrap();
        let err = run_local(&home, &work, AclAction::Remove, Some("alice"), AclTarget::User)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "alice does not have access to foo");
    }

    #[tokio::test]
    async fn test_local_invalid_role_is_rejected() {
        let (_tmp, home, work) = fixture("foo");
        init(&home, &work, None).await.unwrap();
        let err = run_local(&home, &work, AclAction::Add, Some("alice:owner"), AclTarget::User)
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Acl(_)));
    }

    #[tokio::test]
    async fn test_local_branches() {
        let (_tmp, home, work) = fixture("foo");
        init(&home, &work, None).await.unwrap();

        let out = run_local(&home, &work, AclAction::Add, Some("release"), AclTarget::Branch)
            .await
            .unwrap();
        assert_eq!(out, "Repo Visibility:\tpublic\nProtected Branch(s):\tmaster, release\n");

        let out = run_local(&home, &work, AclAction::Remove, Some("master"), AclTarget::Branch)
            .await
            .unwrap();
        assert!(out.ends_with("Protected Branch(s):\trelease\n"));

        let err = run_local(&home, &work, AclAction::Add, None, AclTarget::Branch)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "branch is not provided");
    }

    #[tokio::test]
    async fn test_uninitialized_repo_is_refused() {
        let (_tmp, home, work) = fixture("foo");
        let err = run_local(&home, &work, AclAction::List, None, AclTarget::User)
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::NotInitialized(_)));
    }
}

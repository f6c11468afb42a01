//! Tests driving a real `git` binary in temporary directories.

use pear_git::{GitBridge, GitError};
use pear_types::ObjectId;
use std::path::Path;
use std::process::Command;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn work_repo(dir: &Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/master"]);
}

fn commit(dir: &Path, file: &str) -> ObjectId {
    std::fs::write(dir.join(file), file).unwrap();
    git(dir, &["add", file]);
    git(dir, &["commit", "-q", "-m", file]);
    ObjectId::parse(&git(dir, &["rev-parse", "HEAD"])).unwrap()
}

/// Work repo with one commit mirrored into a bare repo through the pear remote.
async fn mirrored() -> (tempfile::TempDir, GitBridge, ObjectId) {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("work");
    std::fs::create_dir_all(&work).unwrap();
    work_repo(&work);
    let first = commit(&work, "a.txt");

    let bridge = GitBridge::in_dir(&work);
    bridge.create_bare_repo(&tmp.path().join("code")).await.unwrap();
    bridge.add_remote(&tmp.path().join("code")).await.unwrap();
    bridge.push("master", false).await.unwrap();
    (tmp, bridge, first)
}

#[tokio::test]
async fn test_repo_setup_and_inspection() {
    let (tmp, bridge, first) = mirrored().await;

    assert_eq!(bridge.get_commit().await.unwrap(), first.as_str());
    assert_eq!(bridge.get_current_branch().await.unwrap(), "master");
    let remote = bridge.remote_url().await.unwrap().unwrap();
    assert!(remote.ends_with("code"));
    assert!(tmp.path().join("code").join("HEAD").exists());

    let err = bridge.add_remote(&tmp.path().join("code")).await.unwrap_err();
    assert!(matches!(err, GitError::Exit { .. }));
}

#[tokio::test]
async fn test_list_refs_matches_ls_remote() {
    let (tmp, bridge, first) = mirrored().await;
    let code = tmp.path().join("code");

    let refs = bridge.list_refs(code.to_str().unwrap()).await.unwrap();
    assert_eq!(refs["refs/heads/master"], first);

    let raw = git(tmp.path(), &["ls-remote", code.to_str().unwrap()]);
    assert_eq!(refs, pear_git::parse_ls_remote(&raw).unwrap());
}

#[tokio::test]
async fn test_list_refs_missing_repo() {
    let tmp = tempfile::tempdir().unwrap();
    let bridge = GitBridge::in_dir(tmp.path());
    let err = bridge.list_refs("/definitely/not/a/repo").await.unwrap_err();
    assert!(matches!(err, GitError::Exit { code, .. } if code != 0));
}

#[tokio::test]
async fn test_upload_pack_want_only_then_unpack() {
    let (tmp, _bridge, first) = mirrored().await;
    let code = tmp.path().join("code");

    let target = tmp.path().join("clone");
    std::fs::create_dir_all(&target).unwrap();
    work_repo(&target);

    let local = GitBridge::in_dir(&target);
    let mut pack = local.upload_pack(&code, &first, None).await.unwrap();
    local.unpack_stream(&mut pack).await.unwrap();
    pack.finish().await.unwrap();

    git(&target, &["cat-file", "-e", first.as_str()]);
}

#[tokio::test]
async fn test_upload_pack_with_common_have() {
    let (tmp, bridge, first) = mirrored().await;
    let work = tmp.path().join("work");
    let second = commit(&work, "b.txt");
    bridge.push("master", false).await.unwrap();

    // a clone that already has the first commit
    let target = tmp.path().join("clone");
    std::fs::create_dir_all(&target).unwrap();
    work_repo(&target);
    let local = GitBridge::in_dir(&target);
    let code = tmp.path().join("code");
    let mut pack = local.upload_pack(&code, &first, None).await.unwrap();
    local.unpack_stream(&mut pack).await.unwrap();
    pack.finish().await.unwrap();

    let mut pack = local.upload_pack(&code, &second, Some(&first)).await.unwrap();
    local.unpack_stream(&mut pack).await.unwrap();
    pack.finish().await.unwrap();
    git(&target, &["cat-file", "-e", second.as_str()]);
}

#[tokio::test]
async fn test_upload_pack_with_unknown_have() {
    let (tmp, _bridge, first) = mirrored().await;
    let code = tmp.path().join("code");
    let unknown = ObjectId::parse("1111111111111111111111111111111111111111").unwrap();

    let target = tmp.path().join("clone");
    std::fs::create_dir_all(&target).unwrap();
    work_repo(&target);
    let local = GitBridge::in_dir(&target);

    let mut pack = local.upload_pack(&code, &first, Some(&unknown)).await.unwrap();
    local.unpack_stream(&mut pack).await.unwrap();
    pack.finish().await.unwrap();
    git(&target, &["cat-file", "-e", first.as_str()]);
}

#[tokio::test]
async fn test_upload_pack_unknown_want_fails() {
    let (tmp, bridge, _first) = mirrored().await;
    let unknown = ObjectId::parse("2222222222222222222222222222222222222222").unwrap();
    assert!(bridge.upload_pack(&tmp.path().join("code"), &unknown, None).await.is_err());
}

#[tokio::test]
async fn test_unpack_garbage_fails() {
    let tmp = tempfile::tempdir().unwrap();
    work_repo(tmp.path());
    let bridge = GitBridge::in_dir(tmp.path());
    let err = bridge.unpack_stream(&b"definitely not a pack"[..]).await.unwrap_err();
    assert!(matches!(err, GitError::Exit { .. }));
}

#[tokio::test]
async fn test_fetch_into_bare_and_delete_branch() {
    let (tmp, _bridge, first) = mirrored().await;
    let work = tmp.path().join("work");
    git(&work, &["branch", "topic"]);

    let server = tmp.path().join("server");
    let bridge = GitBridge::in_dir(tmp.path());
    bridge.create_bare_repo(&server).await.unwrap();

    bridge
        .fetch_into_bare(&server, work.to_str().unwrap(), "topic", false)
        .await
        .unwrap();
    let refs = bridge.list_refs(server.to_str().unwrap()).await.unwrap();
    assert_eq!(refs["refs/heads/topic"], first);

    bridge.delete_branch(&server, "topic").await.unwrap();
    let refs = bridge.list_refs(server.to_str().unwrap()).await.unwrap();
    assert!(!refs.contains_key("refs/heads/topic"));

    let err = bridge.delete_branch(&server, "topic").await.unwrap_err();
    assert!(err.stderr().is_some());
}

#[tokio::test]
async fn test_non_fast_forward_needs_force() {
    let (tmp, _bridge, _first) = mirrored().await;
    let work = tmp.path().join("work");
    let server = tmp.path().join("server");
    let bridge = GitBridge::in_dir(tmp.path());
    bridge.create_bare_repo(&server).await.unwrap();
    let url = work.to_str().unwrap();

    commit(&work, "b.txt");
    bridge.fetch_into_bare(&server, url, "master", false).await.unwrap();

    git(&work, &["reset", "-q", "--hard", "HEAD~1"]);
    let rewritten = commit(&work, "c.txt");
    assert!(bridge.fetch_into_bare(&server, url, "master", false).await.is_err());
    bridge.fetch_into_bare(&server, url, "master", true).await.unwrap();

    let refs = bridge.list_refs(server.to_str().unwrap()).await.unwrap();
    assert_eq!(refs["refs/heads/master"], rewritten);
}

#[tokio::test]
async fn test_env_reaches_git_commands() {
    let (tmp, _, first) = mirrored().await;
    let bridge = GitBridge::in_dir(tmp.path()).with_env("GIT_DIR", tmp.path().join("work").join(".git"));
    assert_eq!(bridge.get_commit().await.unwrap(), first.as_str());
}

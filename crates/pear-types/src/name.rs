//! Repository and branch name validation.

use crate::{Result, TypeError};
use once_cell::sync::Lazy;
use regex::Regex;

/// Valid repository names.
/// Must start with alphanumeric, can contain alphanumeric, dots, hyphens and underscores.
pub static REPO_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*$").expect("Invalid regex"));

/// Valid branch names, a subset of what `git check-ref-format` accepts.
pub static BRANCH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9/_.+-]*$").expect("Invalid regex"));

const MAX_NAME_LENGTH: usize = 100;
const MAX_BRANCH_LENGTH: usize = 255;

/// Validate a repository name.
pub fn validate_repo_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return Err(TypeError::InvalidRepoName(name.to_string()));
    }
    if !REPO_NAME_REGEX.is_match(name) || name.contains("..") {
        return Err(TypeError::InvalidRepoName(name.to_string()));
    }
    Ok(())
}

/// Validate a short branch name (without the `refs/heads/` prefix).
pub fn validate_branch_name(branch: &str) -> Result<()> {
    if branch.is_empty() || branch.len() > MAX_BRANCH_LENGTH {
        return Err(TypeError::InvalidBranch(branch.to_string()));
    }
    if !BRANCH_REGEX.is_match(branch)
        || branch.contains("..")
        || branch.contains("//")
        || branch.ends_with('/')
        || branch.ends_with(".lock")
    {
        return Err(TypeError::InvalidBranch(branch.to_string()));
    }
    Ok(())
}

/// Strip a leading `refs/heads/` from a ref name.
pub fn short_branch(refname: &str) -> &str {
    refname.strip_prefix("refs/heads/").unwrap_or(refname)
}

//! Version-control context attached to a deployment record.
//!
//! Running the version-control tool is left to the caller, which implements
//! [`VersionControl`]; this module only decides which facts to collect.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Fields of a commit that can be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitField {
    Sha,
    Message,
    CommitterEmail,
}

impl CommitField {
    /// The `git show --format` placeholder for the field.
    pub fn format(&self) -> &'static str {
        match self {
            CommitField::Sha => "%H",
            CommitField::Message => "%B",
            CommitField::CommitterEmail => "%ae",
        }
    }
}

/// Read access to the working copy the service is deployed from.
pub trait VersionControl {
    /// Whether the working directory is inside a repository.
    fn is_repo(&self) -> Result<bool>;

    /// The checked out branch, `None` when detached.
    fn current_branch(&self) -> Result<Option<String>>;

    /// The remote the branch tracks.
    fn branch_remote(&self, branch: &str) -> Result<Option<String>>;

    /// The fetch URL of a remote.
    fn remote_fetch_url(&self, remote: &str) -> Result<Option<String>>;

    /// Reads a field of the commit at `revision` (empty for `HEAD`).
    ///
    /// Returns `None` when there is no such commit, as in a repository
    /// without commits.
    fn commit_field(&self, revision: &str, field: CommitField) -> Result<Option<String>>;

    /// Path of the working directory relative to the repository root.
    fn relative_path(&self) -> Result<String>;
}

/// Kinds of version control recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VcsKind {
    Git,
}

/// Version-control facts about a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VcsInfo {
    /// `null` when the service is not deployed from a repository.
    #[serde(rename = "type")]
    pub kind: Option<VcsKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committer_email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
}

impl VcsInfo {
    /// Info for a service not deployed from a repository.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_git(&self) -> bool {
        self.kind == Some(VcsKind::Git)
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Collects version-control facts for the working copy.
///
/// A failure to tell whether this is a repository counts as "not a
/// repository"; failures after that propagate.
pub fn collect_vcs_info<V>(vcs: &V) -> Result<VcsInfo>
where
    V: VersionControl + ?Sized,
{
    let is_repo = match vcs.is_repo() {
        Ok(is_repo) => is_repo,
        Err(err) => {
            tracing::debug!(error = %err, "Repository check failed");
            false
        }
    };
    if !is_repo {
        return Ok(VcsInfo::none());
    }

    let mut info = VcsInfo {
        kind: Some(VcsKind::Git),
        ..VcsInfo::default()
    };

    let branch = trimmed(vcs.current_branch()?);
    if let Some(branch) = &branch {
        if let Some(remote) = trimmed(vcs.branch_remote(branch)?) {
            info.origin_url = trimmed(vcs.remote_fetch_url(&remote)?);
        }
        info.branch = Some(branch.clone());
    }

    let revision = branch.as_deref().unwrap_or("");
    info.commit = trimmed(vcs.commit_field(revision, CommitField::Sha)?);
    if info.commit.is_some() {
        info.commit_message = trimmed(vcs.commit_field(revision, CommitField::Message)?);
        info.committer_email = trimmed(vcs.commit_field(revision, CommitField::CommitterEmail)?);
    }

    info.relative_path = Some(vcs.relative_path()?.trim().to_string());

    tracing::debug!(
        branch = info.branch.as_deref().unwrap_or(""),
        commit = info.commit.as_deref().unwrap_or(""),
        "Collected version control info"
    );
    Ok(info)
}

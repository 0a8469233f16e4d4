use serde::{Deserialize, Serialize};

use crate::error::{GithubError, Result};

/// `owner/name` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(GithubError::InvalidRepo(raw.to_string())),
        }
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentEntry {
    pub name: String,
    pub path: String,
    pub sha: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub html_url: Option<String>,
}

/// A single file with its decoded body.
#[derive(Debug, Clone)]
pub struct FileContent {
    pub path: String,
    pub sha: String,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawFile {
    pub path: String,
    pub sha: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub encoding: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct PutFileRequest<'a> {
    pub message: &'a str,
    /// Base64 body.
    pub content: String,
    pub branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommittedContent {
    pub path: String,
    pub sha: String,
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitRef {
    pub sha: String,
}

/// Response of a create-or-update-file call.
#[derive(Debug, Clone, Deserialize)]
pub struct PutFileResponse {
    pub content: CommittedContent,
    pub commit: CommitRef,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub message: String,
}

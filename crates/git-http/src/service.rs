use std::fmt;
use std::str::FromStr;

use crate::errors::RepositoryError;

/// The two smart HTTP transport services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Fetch and clone direction.
    UploadPack,
    /// Push direction.
    ReceivePack,
}

impl Service {
    /// Name as it appears on the wire (`?service=`, POST path, content types).
    pub fn as_str(self) -> &'static str {
        match self {
            Service::UploadPack => "git-upload-pack",
            Service::ReceivePack => "git-receive-pack",
        }
    }

    /// `git` subcommand implementing the service.
    pub fn subcommand(self) -> &'static str {
        match self {
            Service::UploadPack => "upload-pack",
            Service::ReceivePack => "receive-pack",
        }
    }

    pub fn advertisement_content_type(self) -> String {
        format!("application/x-{}-advertisement", self.as_str())
    }

    pub fn result_content_type(self) -> String {
        format!("application/x-{}-result", self.as_str())
    }
}

impl FromStr for Service {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git-upload-pack" => Ok(Service::UploadPack),
            "git-receive-pack" => Ok(Service::ReceivePack),
            other => Err(RepositoryError::UnexpectedService(other.to_string())),
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A configuration input taken from an artifact another task produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyHandle {
    pub upstream: String,
    pub artifact: String,
}

impl DependencyHandle {
    pub fn new(upstream: &str, artifact: &str) -> Self {
        Self {
            upstream: upstream.to_string(),
            artifact: artifact.to_string(),
        }
    }
}

impl fmt::Display for DependencyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.upstream, self.artifact)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Export {
    Ready(PathBuf),
    /// Upstream has not finished; try again on a later tick.
    NotReady,
}

/// Where a staging task looks up its dependencies.
pub trait ArtifactSource {
    fn export(&self, handle: &DependencyHandle) -> Result<Export>;
}

/// Source for tasks that declare no inputs.
pub struct NoUpstream;

impl ArtifactSource for NoUpstream {
    fn export(&self, _handle: &DependencyHandle) -> Result<Export> {
        Ok(Export::NotReady)
    }
}

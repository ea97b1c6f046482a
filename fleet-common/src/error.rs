use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("cannot read cloud-config template {}: {source}", .path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot render cloud-config template {}: {message}", .path.display())]
    TemplateRender { path: PathBuf, message: String },

    #[error("to load an instance you need to pass its id")]
    MissingIdentifier,

    #[error("no instance was found with id <{id}>")]
    NotFound { id: String },

    /// Zero instances came back from a creation call.
    #[error("provider created no instance")]
    CreateFailed,

    #[error("provider returned an unexpected result: {0}")]
    ProviderInvariant(String),

    #[error("provider call {operation} failed: {source}")]
    ProviderApi {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The instance exists but is untagged; nothing is rolled back.
    #[error("failed to tag instance <{id}>: {source}")]
    Tagging {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("volume <{volume}> failed: {source}")]
    Volume {
        volume: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("gave up after {waited:?} waiting for state <{target}> (last seen <{last}>)")]
    Timeout {
        target: String,
        last: String,
        waited: Duration,
    },

    #[error("cancelled while waiting for state <{target}>")]
    Cancelled { target: String },
}

impl ProvisionError {
    pub fn provider(operation: &'static str, source: anyhow::Error) -> Self {
        ProvisionError::ProviderApi { operation, source }
    }
}

/// A per-record failure carrying enough identity to find the resource out-of-band.
#[derive(Error, Debug)]
#[error("instance <{name}>{}: {error}", id_suffix(.id))]
pub struct RecordFailure {
    pub name: String,
    pub id: Option<String>,
    #[source]
    pub error: ProvisionError,
}

/// Provider-side error for a creation call that got as far as allocating an instance
/// before a later step failed. The instance exists and is left in place.
#[derive(Error, Debug)]
#[error("instance <{instance_id}> was created but {stage} failed: {source}")]
pub struct IncompleteCreate {
    pub instance_id: String,
    pub stage: &'static str,
    #[source]
    pub source: anyhow::Error,
}

fn id_suffix(id: &Option<String>) -> String {
    match id {
        Some(id) => format!(" (id <{}>)", id),
        None => String::new(),
    }
}

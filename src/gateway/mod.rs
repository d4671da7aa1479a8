//! The single async boundary to the backend process.
//!
//! Everything that touches the network or the disk goes through a
//! [`CommandGateway`]. The core never assumes ordering between two calls it
//! did not sequence itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::GatewayError;

pub mod channel;

pub const LIST_LOCAL_ENTRIES: &str = "list-local-entries";
pub const GET_PEER_ROSTER_AND_PATHS: &str = "get-peer-roster-and-paths";
pub const GET_WORKSPACE_ROOT: &str = "get-workspace-root";
pub const SEND_FILE: &str = "send-file";
pub const RECEIVE_FILE: &str = "receive-file";
pub const GET_LOCAL_NICKNAME: &str = "get-local-nickname";

/// One level of a local directory as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryContents {
    pub folders: Vec<String>,
    pub files: Vec<String>,
}

impl DirectoryContents {
    pub fn contains(&self, name: &str) -> bool {
        self.files.iter().chain(&self.folders).any(|entry| entry == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub nickname: String,
    pub peer_id: String,
    pub os: String,
}

impl RosterEntry {
    pub fn new(
        nickname: impl Into<String>,
        peer_id: impl Into<String>,
        os: impl Into<String>,
    ) -> Self {
        Self {
            nickname: nickname.into(),
            peer_id: peer_id.into(),
            os: os.into(),
        }
    }
}

/// Path lists keyed by peer id.
pub type PathMap = HashMap<String, Vec<String>>;

/// Combined result of one presence fetch: who is reachable and what each
/// peer exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceReport {
    pub paths: PathMap,
    pub roster: Vec<RosterEntry>,
}

/// Arguments of `send-file` and `receive-file`. For a send the source is
/// local and the target is on the peer; for a receive it is the other way
/// round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCommand {
    pub peer_id: String,
    pub source_path: String,
    pub target_path: String,
}

#[async_trait]
pub trait CommandGateway: Send + Sync {
    async fn list_local_entries(&self, path: &str) -> Result<DirectoryContents, GatewayError>;

    async fn peer_roster_and_paths(&self) -> Result<PresenceReport, GatewayError>;

    async fn workspace_root(&self) -> Result<String, GatewayError>;

    async fn send_file(&self, transfer: TransferCommand) -> Result<(), GatewayError>;

    async fn receive_file(&self, transfer: TransferCommand) -> Result<(), GatewayError>;

    async fn local_nickname(&self) -> Result<String, GatewayError>;
}

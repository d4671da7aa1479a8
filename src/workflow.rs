//! One user-initiated send or receive, from picking the source to the final
//! transfer command.
//!
//! Steps run strictly in order. The only way back is from a failed
//! submission or a name collision, both of which return to naming with the
//! request intact.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{LocalProfile, SUCCESS_NOTICE};
use crate::error::WorkflowError;
use crate::gateway::{CommandGateway, TransferCommand};
use crate::registry::PresenceSnapshot;
use crate::tree::PathForest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Send,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    SelectingSource,
    SelectingDestinationDevice,
    SelectingDestinationPath,
    ConfirmingName,
    Submitting,
    Succeeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub direction: Direction,
    /// Source file for a send, destination folder for a receive.
    pub local_path: String,
    pub peer_id: String,
    /// Destination folder for a send, source file for a receive.
    pub remote_target_path: String,
    pub save_name: String,
}

impl TransferRequest {
    fn empty(direction: Direction) -> Self {
        Self {
            direction,
            local_path: String::new(),
            peer_id: String::new(),
            remote_target_path: String::new(),
            save_name: String::new(),
        }
    }

    fn source_path(&self) -> &str {
        match self.direction {
            Direction::Send => &self.local_path,
            Direction::Receive => &self.remote_target_path,
        }
    }

    fn destination_folder(&self) -> &str {
        match self.direction {
            Direction::Send => &self.remote_target_path,
            Direction::Receive => &self.local_path,
        }
    }

    fn to_command(&self) -> TransferCommand {
        TransferCommand {
            peer_id: self.peer_id.clone(),
            source_path: self.source_path().to_string(),
            target_path: join_target(self.destination_folder(), &self.save_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Local { path: String },
    Remote { peer_id: String, path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Peer { nickname: String },
    Local,
}

/// What the user picks a destination folder from.
#[derive(Debug, Clone)]
pub enum DestinationSpace {
    Remote { peer_id: String, tree: PathForest },
    Local { root: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub request: TransferRequest,
    pub completed_at: DateTime<Utc>,
}

impl TransferOutcome {
    /// When the success indicator for this transfer should disappear.
    pub fn notice_until(&self) -> DateTime<Utc> {
        self.completed_at + TimeDelta::from_std(SUCCESS_NOTICE).unwrap_or(TimeDelta::zero())
    }
}

pub struct TransferWorkflow {
    gateway: Arc<dyn CommandGateway>,
    profile: LocalProfile,
    state: TransferState,
    request: TransferRequest,
    destination_tree: Option<PathForest>,
    last_error: Option<String>,
}

impl TransferWorkflow {
    pub fn new(
        direction: Direction,
        gateway: Arc<dyn CommandGateway>,
        profile: LocalProfile,
    ) -> Self {
        Self {
            gateway,
            profile,
            state: TransferState::SelectingSource,
            request: TransferRequest::empty(direction),
            destination_tree: None,
            last_error: None,
        }
    }

    pub fn send(gateway: Arc<dyn CommandGateway>, profile: LocalProfile) -> Self {
        Self::new(Direction::Send, gateway, profile)
    }

    pub fn receive(gateway: Arc<dyn CommandGateway>, profile: LocalProfile) -> Self {
        Self::new(Direction::Receive, gateway, profile)
    }

    pub const fn state(&self) -> TransferState {
        self.state
    }

    pub const fn direction(&self) -> Direction {
        self.request.direction
    }

    pub const fn request(&self) -> &TransferRequest {
        &self.request
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn choose_source(&mut self, source: Source) -> Result<(), WorkflowError> {
        self.expect_state(TransferState::SelectingSource)?;

        match (self.request.direction, source) {
            (Direction::Send, Source::Local { path }) => {
                require_path(self.state, &path, "no local file selected")?;
                self.request.local_path = path;
            }
            (Direction::Receive, Source::Remote { peer_id, path }) => {
                require_path(self.state, &peer_id, "no peer selected")?;
                require_path(self.state, &path, "no remote file selected")?;
                self.request.peer_id = peer_id;
                self.request.remote_target_path = path;
            }
            (direction, _) => {
                return Err(WorkflowError::invalid(
                    self.state,
                    format!("source does not match a {direction:?} transfer"),
                ));
            }
        }

        self.advance(TransferState::SelectingDestinationDevice);
        Ok(())
    }

    /// Picks the device the file goes to and returns the space its
    /// destination folder is chosen from.
    pub fn choose_destination(
        &mut self,
        destination: Destination,
        presence: &PresenceSnapshot,
    ) -> Result<DestinationSpace, WorkflowError> {
        self.expect_state(TransferState::SelectingDestinationDevice)?;

        let space = match (self.request.direction, destination) {
            (Direction::Send, Destination::Peer { nickname }) => {
                let device = presence
                    .device(&nickname)
                    .filter(|device| !device.is_my_device)
                    .ok_or_else(|| {
                        WorkflowError::invalid(self.state, format!("unknown peer {nickname:?}"))
                    })?;
                if !device.is_online {
                    return Err(WorkflowError::invalid(
                        self.state,
                        format!("{nickname:?} is offline"),
                    ));
                }
                let peer_id = presence
                    .live_peer_id(&nickname)
                    .unwrap_or(device.id.as_str())
                    .to_string();
                let tree = presence.tree_for(&peer_id);

                self.request.peer_id.clone_from(&peer_id);
                self.destination_tree = Some(tree.clone());
                DestinationSpace::Remote { peer_id, tree }
            }
            (Direction::Receive, Destination::Local) => DestinationSpace::Local {
                root: self.profile.workspace.clone(),
            },
            (direction, _) => {
                return Err(WorkflowError::invalid(
                    self.state,
                    format!("destination does not match a {direction:?} transfer"),
                ));
            }
        };

        self.advance(TransferState::SelectingDestinationPath);
        Ok(space)
    }

    /// Picks the destination folder and pre-fills the save name from the
    /// source's base name. For a send an empty folder means the peer's
    /// workspace root.
    pub fn choose_folder(&mut self, folder: impl Into<String>) -> Result<&str, WorkflowError> {
        self.expect_state(TransferState::SelectingDestinationPath)?;
        let folder = folder.into();

        match self.request.direction {
            Direction::Send => {
                if !folder.trim_matches('/').is_empty() {
                    let is_folder = self.destination_tree.as_ref().is_some_and(|tree| {
                        tree.find(&folder).is_some_and(|id| !tree.is_file(id))
                    });
                    if !is_folder {
                        return Err(WorkflowError::invalid(
                            self.state,
                            format!("{folder:?} is not a folder on the peer"),
                        ));
                    }
                }
                self.request.remote_target_path = folder;
            }
            Direction::Receive => {
                require_path(self.state, &folder, "no destination folder selected")?;
                self.request.local_path = folder;
            }
        }

        self.request.save_name = base_name(self.request.source_path()).to_string();
        self.advance(TransferState::ConfirmingName);
        Ok(&self.request.save_name)
    }

    pub fn set_save_name(&mut self, name: impl Into<String>) -> Result<(), WorkflowError> {
        self.expect_state(TransferState::ConfirmingName)?;
        self.request.save_name = name.into();
        Ok(())
    }

    /// Checks the name and submits the transfer.
    ///
    /// A receive first lists the destination folder and refuses a name that
    /// is already taken. On any failure the workflow stays in naming with the
    /// request kept, so the user can fix the name or just resubmit.
    pub async fn confirm(&mut self) -> Result<TransferOutcome, WorkflowError> {
        self.expect_state(TransferState::ConfirmingName)?;

        let name = self.request.save_name.trim().to_string();
        if name.is_empty() || name.contains('/') {
            return Err(WorkflowError::invalid(
                self.state,
                format!("{name:?} is not a valid file name"),
            ));
        }
        self.request.save_name = name;

        if self.request.direction == Direction::Receive {
            let folder = self.request.local_path.clone();
            let listing = match self.gateway.list_local_entries(&folder).await {
                Ok(listing) => listing,
                Err(e) => return Err(self.surface(e.into())),
            };
            if listing.contains(&self.request.save_name) {
                return Err(self.surface(WorkflowError::NameCollision {
                    name: self.request.save_name.clone(),
                    folder,
                }));
            }
        }

        let direction = self.request.direction;
        let command = self.request.to_command();
        tracing::info!(
            ?direction,
            peer = %command.peer_id,
            source = %command.source_path,
            target = %command.target_path,
            "submitting transfer"
        );

        self.advance(TransferState::Submitting);
        let gateway = Arc::clone(&self.gateway);
        let pending = PendingSubmission::arm(&mut self.state);
        let result = match direction {
            Direction::Send => gateway.send_file(command).await,
            Direction::Receive => gateway.receive_file(command).await,
        };
        pending.disarm();

        match result {
            Ok(()) => {
                self.advance(TransferState::Succeeded);
                self.last_error = None;
                Ok(TransferOutcome {
                    request: self.request.clone(),
                    completed_at: Utc::now(),
                })
            }
            Err(e) => {
                self.advance(TransferState::ConfirmingName);
                Err(self.surface(e.into()))
            }
        }
    }

    fn expect_state(&self, expected: TransferState) -> Result<(), WorkflowError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(WorkflowError::invalid(self.state, format!("expected {expected:?}")))
        }
    }

    fn advance(&mut self, next: TransferState) {
        tracing::debug!(from = ?self.state, to = ?next, "transfer workflow step");
        self.state = next;
    }

    fn surface(&mut self, error: WorkflowError) -> WorkflowError {
        tracing::warn!("transfer not submitted: {}", error);
        self.last_error = Some(error.to_string());
        error
    }
}

// Puts a dropped submission back to naming, so a cancelled `confirm` can be
// resubmitted.
struct PendingSubmission<'a>(Option<&'a mut TransferState>);

impl<'a> PendingSubmission<'a> {
    fn arm(state: &'a mut TransferState) -> Self {
        Self(Some(state))
    }

    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for PendingSubmission<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.0.take() {
            tracing::warn!("transfer submission cancelled before the backend answered");
            *state = TransferState::ConfirmingName;
        }
    }
}

fn require_path(state: TransferState, value: &str, reason: &str) -> Result<(), WorkflowError> {
    if value.trim().is_empty() {
        Err(WorkflowError::invalid(state, reason))
    } else {
        Ok(())
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(path)
}

fn join_target(folder: &str, name: &str) -> String {
    let folder = folder.trim_end_matches('/');
    if folder.is_empty() || folder == "." {
        format!("./{name}")
    } else {
        format!("{folder}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("~/docs/readme.txt"), "readme.txt");
        assert_eq!(base_name("docs/guides/"), "guides");
        assert_eq!(base_name("notes.md"), "notes.md");
    }

    #[test]
    fn test_join_target() {
        assert_eq!(join_target("", "a.txt"), "./a.txt");
        assert_eq!(join_target(".", "a.txt"), "./a.txt");
        assert_eq!(join_target("docs/", "a.txt"), "docs/a.txt");
        assert_eq!(join_target("/home/me/ws", "a.txt"), "/home/me/ws/a.txt");
    }

    #[test]
    fn test_dropped_submission_returns_to_naming() {
        let mut state = TransferState::Submitting;
        drop(PendingSubmission::arm(&mut state));
        assert_eq!(state, TransferState::ConfirmingName);

        let mut state = TransferState::Submitting;
        PendingSubmission::arm(&mut state).disarm();
        assert_eq!(state, TransferState::Submitting);
    }

    #[test]
    fn test_request_command_follows_direction() {
        let request = TransferRequest {
            direction: Direction::Receive,
            local_path: "/home/me/ws".to_string(),
            peer_id: "id1".to_string(),
            remote_target_path: "docs/readme.txt".to_string(),
            save_name: "readme.txt".to_string(),
        };
        assert_eq!(
            request.to_command(),
            TransferCommand {
                peer_id: "id1".to_string(),
                source_path: "docs/readme.txt".to_string(),
                target_path: "/home/me/ws/readme.txt".to_string(),
            }
        );
    }
}

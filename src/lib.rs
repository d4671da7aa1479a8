//! Client-side model for browsing and moving files across a peer group.
//!
//! The presentation layer drives three pieces: a [`PeerPresenceRegistry`]
//! polled by a [`PresencePoller`], the [`tree`] builder that turns flat path
//! lists into folders and files, and a [`TransferWorkflow`] per send or
//! receive. All I/O goes through a [`CommandGateway`].

pub mod browser;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod registry;
pub mod tree;
pub mod workflow;


pub use browser::{DirectoryItem, LocalBrowser};
pub use config::{LocalProfile, ProfileStore};
pub use error::{GatewayError, WorkflowError};
pub use gateway::{CommandGateway, DirectoryContents, PresenceReport, RosterEntry, TransferCommand};
pub use registry::{Device, PeerPresenceRegistry, PresencePoller, PresenceSnapshot, RefreshOutcome};
pub use tree::{PathForest, PathNode};
pub use workflow::{
    Destination, DestinationSpace, Direction, Source, TransferOutcome, TransferRequest,
    TransferState, TransferWorkflow,
};

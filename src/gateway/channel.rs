use async_trait::async_trait;
use futures::{
    channel::{mpsc, oneshot},
    prelude::*,
};

use super::{
    CommandGateway, DirectoryContents, PresenceReport, TransferCommand, GET_LOCAL_NICKNAME,
    GET_PEER_ROSTER_AND_PATHS, GET_WORKSPACE_ROOT, LIST_LOCAL_ENTRIES, RECEIVE_FILE, SEND_FILE,
};
use crate::error::GatewayError;

// Requests queued ahead of the backend before callers start waiting.
const COMMAND_BUFFER: usize = 16;

type Reply<T> = oneshot::Sender<Result<T, GatewayError>>;

/// Creates the gateway components, namely:
///
/// - The gateway handed to the registry, workflows and browsers.
///
/// - The command stream the backend bridge drains and answers.
pub fn new() -> (ChannelGateway, mpsc::Receiver<Command>) {
    let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
    (ChannelGateway { sender }, receiver)
}

#[derive(Clone)]
pub struct ChannelGateway {
    sender: mpsc::Sender<Command>,
}

impl ChannelGateway {
    async fn request<T, F>(&self, name: &'static str, command: F) -> Result<T, GatewayError>
    where
        T: Send,
        F: FnOnce(Reply<T>) -> Command + Send,
    {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .clone()
            .send(command(sender))
            .await
            .map_err(|_| GatewayError::disconnected(name))?;
        receiver
            .await
            .map_err(|_| GatewayError::disconnected(name))?
    }
}

#[async_trait]
impl CommandGateway for ChannelGateway {
    async fn list_local_entries(&self, path: &str) -> Result<DirectoryContents, GatewayError> {
        let path = path.to_string();
        self.request(LIST_LOCAL_ENTRIES, |sender| Command::ListLocalEntries { path, sender })
            .await
    }

    async fn peer_roster_and_paths(&self) -> Result<PresenceReport, GatewayError> {
        self.request(GET_PEER_ROSTER_AND_PATHS, |sender| {
            Command::PeerRosterAndPaths { sender }
        })
        .await
    }

    async fn workspace_root(&self) -> Result<String, GatewayError> {
        self.request(GET_WORKSPACE_ROOT, |sender| Command::WorkspaceRoot { sender })
            .await
    }

    async fn send_file(&self, transfer: TransferCommand) -> Result<(), GatewayError> {
        self.request(SEND_FILE, |sender| Command::SendFile { transfer, sender })
            .await
    }

    async fn receive_file(&self, transfer: TransferCommand) -> Result<(), GatewayError> {
        self.request(RECEIVE_FILE, |sender| Command::ReceiveFile { transfer, sender })
            .await
    }

    async fn local_nickname(&self) -> Result<String, GatewayError> {
        self.request(GET_LOCAL_NICKNAME, |sender| Command::LocalNickname { sender })
            .await
    }
}

/// A pending gateway call. The backend answers through `sender`; dropping it
/// unanswered fails the call as disconnected.
#[derive(Debug)]
pub enum Command {
    ListLocalEntries {
        path: String,
        sender: Reply<DirectoryContents>,
    },
    PeerRosterAndPaths {
        sender: Reply<PresenceReport>,
    },
    WorkspaceRoot {
        sender: Reply<String>,
    },
    SendFile {
        transfer: TransferCommand,
        sender: Reply<()>,
    },
    ReceiveFile {
        transfer: TransferCommand,
        sender: Reply<()>,
    },
    LocalNickname {
        sender: Reply<String>,
    },
}

impl Command {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ListLocalEntries { .. } => LIST_LOCAL_ENTRIES,
            Self::PeerRosterAndPaths { .. } => GET_PEER_ROSTER_AND_PATHS,
            Self::WorkspaceRoot { .. } => GET_WORKSPACE_ROOT,
            Self::SendFile { .. } => SEND_FILE,
            Self::ReceiveFile { .. } => RECEIVE_FILE,
            Self::LocalNickname { .. } => GET_LOCAL_NICKNAME,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_is_answered_by_backend() {
        let (gateway, mut commands) = new();

        let backend = tokio::spawn(async move {
            while let Some(command) = commands.next().await {
                tracing::debug!(command = command.name(), "backend received command");
                match command {
                    Command::LocalNickname { sender } => {
                        let _ = sender.send(Ok("desk".to_string()));
                    }
                    Command::SendFile { transfer, sender } => {
                        let _ = sender.send(Err(GatewayError::new(
                            SEND_FILE,
                            format!("{} does not exist", transfer.source_path),
                        )));
                    }
                    other => drop(other),
                }
            }
        });

        assert_eq!(gateway.local_nickname().await.unwrap(), "desk");

        let err = gateway
            .send_file(TransferCommand {
                peer_id: "id1".to_string(),
                source_path: "~/missing.txt".to_string(),
                target_path: "./missing.txt".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.message, "~/missing.txt does not exist");

        // Dropped reply sender
        let err = gateway.workspace_root().await.unwrap_err();
        assert_eq!(err, GatewayError::disconnected(GET_WORKSPACE_ROOT));

        drop(gateway);
        backend.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_backend_fails_as_disconnected() {
        let (gateway, commands) = new();
        drop(commands);

        let err = gateway.peer_roster_and_paths().await.unwrap_err();
        assert_eq!(err.command, GET_PEER_ROSTER_AND_PATHS);
        assert_eq!(err.message, "backend disconnected");
    }
}

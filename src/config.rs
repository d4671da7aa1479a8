use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::GatewayError;
use crate::gateway::CommandGateway;

/// Time between two presence refreshes.
pub const PRESENCE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// How long a finished transfer keeps its success indicator up.
pub const SUCCESS_NOTICE: Duration = Duration::from_millis(1500);

/// Where local browsing starts before the workspace is known.
pub const DEFAULT_BROWSE_ROOT: &str = "~";

static PROFILE: Lazy<ProfileStore> = Lazy::new(ProfileStore::default);

/// Identity and workspace of this device, as configured in the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalProfile {
    pub nickname: String,
    pub workspace: String,
}

impl LocalProfile {
    async fn fetch(gateway: &dyn CommandGateway) -> Result<Self, GatewayError> {
        let nickname = gateway.local_nickname().await?;
        let workspace = gateway.workspace_root().await?;
        Ok(Self {
            nickname,
            workspace,
        })
    }
}

/// Holds the [`LocalProfile`] so views stop fetching nickname and workspace
/// on their own.
#[derive(Default)]
pub struct ProfileStore {
    current: RwLock<Option<LocalProfile>>,
    loading: Mutex<()>,
}

impl ProfileStore {
    pub fn current(&self) -> Option<LocalProfile> {
        self.current.read().clone()
    }

    /// Fetches the profile the first time and returns the cached copy after
    /// that. Concurrent callers wait for the one fetch in progress.
    pub async fn init(
        &self,
        gateway: &dyn CommandGateway,
    ) -> Result<LocalProfile, GatewayError> {
        if let Some(profile) = self.current() {
            return Ok(profile);
        }

        let _loading = self.loading.lock().await;
        if let Some(profile) = self.current() {
            return Ok(profile);
        }

        let profile = LocalProfile::fetch(gateway).await?;
        tracing::info!(
            nickname = %profile.nickname,
            workspace = %profile.workspace,
            "local profile loaded"
        );
        *self.current.write() = Some(profile.clone());
        Ok(profile)
    }

    /// Fetches the profile again, replacing the cached one on success.
    pub async fn reload(
        &self,
        gateway: &dyn CommandGateway,
    ) -> Result<LocalProfile, GatewayError> {
        let _loading = self.loading.lock().await;
        let profile = LocalProfile::fetch(gateway).await?;
        tracing::info!(nickname = %profile.nickname, "local profile reloaded");
        *self.current.write() = Some(profile.clone());
        Ok(profile)
    }
}

/// The process-wide profile store.
pub fn profile() -> &'static ProfileStore {
    &PROFILE
}

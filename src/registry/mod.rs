//! Live, eventually-consistent view of which peers are reachable and what
//! they expose.
//!
//! Devices are keyed by nickname. A peer whose id changes across restarts
//! but keeps its nickname stays the same device, so transfer history
//! survives reconnects. Devices are never removed once seen; peers that drop
//! out of the roster are only marked offline.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::{LocalProfile, ProfileStore};
use crate::error::GatewayError;
use crate::gateway::{CommandGateway, RosterEntry};
use crate::tree::{self, PathForest};

pub mod poller;

pub use poller::PresencePoller;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Peer id as first observed; empty for the local device.
    pub id: String,
    pub nickname: String,
    pub os: String,
    pub is_online: bool,
    pub is_my_device: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Device {
    pub fn local(nickname: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            nickname: nickname.into(),
            os: String::new(),
            is_online: true,
            is_my_device: true,
            last_seen: Some(now),
        }
    }

    fn discovered(entry: &RosterEntry, local_nickname: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: entry.peer_id.clone(),
            nickname: entry.nickname.clone(),
            os: entry.os.clone(),
            is_online: true,
            is_my_device: entry.nickname == local_nickname,
            last_seen: Some(now),
        }
    }
}

/// Path lists keyed by peer id, replaced wholesale on every refresh.
pub type RemotePathIndex = HashMap<String, Vec<String>>;

/// Immutable state handed to views and workflows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PresenceSnapshot {
    pub devices: Vec<Device>,
    pub paths: RemotePathIndex,
    /// Roster of the latest successful refresh.
    pub roster: Vec<RosterEntry>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl PresenceSnapshot {
    pub fn device(&self, nickname: &str) -> Option<&Device> {
        self.devices.iter().find(|device| device.nickname == nickname)
    }

    pub fn local_device(&self) -> Option<&Device> {
        self.devices.iter().find(|device| device.is_my_device)
    }

    pub fn online(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(|device| device.is_online)
    }

    pub fn offline(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(|device| !device.is_online)
    }

    /// The id a nickname currently answers to. Falls back to the id stored
    /// on the device when the peer is not in the latest roster.
    pub fn live_peer_id(&self, nickname: &str) -> Option<&str> {
        self.roster
            .iter()
            .find(|entry| entry.nickname == nickname)
            .map(|entry| entry.peer_id.as_str())
            .or_else(|| {
                self.device(nickname)
                    .filter(|device| !device.is_my_device)
                    .map(|device| device.id.as_str())
            })
    }

    pub fn paths_for(&self, peer_id: &str) -> &[String] {
        self.paths.get(peer_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn tree_for(&self, peer_id: &str) -> PathForest {
        tree::build(self.paths_for(peer_id))
    }
}

/// Folds a fresh roster into the previous device list.
///
/// Known nicknames go online with a new `last_seen`, missing ones go offline
/// and keep their record, unseen ones are appended. The local device is
/// whichever device carries `local_nickname`; it is this process and stays
/// online whether or not the roster lists it.
pub fn reconcile(
    previous: &[Device],
    roster: &[RosterEntry],
    local_nickname: &str,
    now: DateTime<Utc>,
) -> Vec<Device> {
    let reachable: HashSet<&str> = roster.iter().map(|entry| entry.nickname.as_str()).collect();

    let mut devices: Vec<Device> = previous
        .iter()
        .map(|device| {
            let mut device = device.clone();
            device.is_my_device = device.nickname == local_nickname;
            if device.is_my_device || reachable.contains(device.nickname.as_str()) {
                device.is_online = true;
                device.last_seen = Some(now);
            } else {
                device.is_online = false;
            }
            device
        })
        .collect();

    let known: HashSet<String> = previous.iter().map(|device| device.nickname.clone()).collect();
    devices.extend(
        roster
            .iter()
            .unique_by(|entry| entry.nickname.clone())
            .filter(|entry| !known.contains(&entry.nickname))
            .map(|entry| Device::discovered(entry, local_nickname, now)),
    );

    devices
}

/// Moves the local flag to `local_nickname`, adding a local device when no
/// known device carries that name yet. The previous local device is kept as
/// an ordinary record.
fn relabel_local(previous: &[Device], local_nickname: &str, now: DateTime<Utc>) -> Vec<Device> {
    let mut devices: Vec<Device> = previous
        .iter()
        .map(|device| {
            let mut device = device.clone();
            let was_local = device.is_my_device;
            device.is_my_device = device.nickname == local_nickname;
            if device.is_my_device {
                device.is_online = true;
                device.last_seen = Some(now);
            } else if was_local {
                device.is_online = false;
            }
            device
        })
        .collect();

    if !devices.iter().any(|device| device.is_my_device) {
        devices.push(Device::local(local_nickname, now));
    }
    devices
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New state was published.
    Applied,
    /// Another refresh was already in flight; nothing was fetched.
    Skipped,
    /// The fetch failed and the previous state was kept.
    Failed(GatewayError),
    /// The registry was closed; any fetched result was dropped.
    Discarded,
}

pub struct PeerPresenceRegistry {
    gateway: Arc<dyn CommandGateway>,
    local_nickname: RwLock<String>,
    state: watch::Sender<Arc<PresenceSnapshot>>,
    in_flight: AtomicBool,
    closed: AtomicBool,
}

impl PeerPresenceRegistry {
    pub fn new(gateway: Arc<dyn CommandGateway>, local_nickname: impl Into<String>) -> Self {
        let local_nickname = local_nickname.into();
        let snapshot = PresenceSnapshot {
            devices: vec![Device::local(local_nickname.clone(), Utc::now())],
            ..PresenceSnapshot::default()
        };
        let (state, _) = watch::channel(Arc::new(snapshot));

        Self {
            gateway,
            local_nickname: RwLock::new(local_nickname),
            state,
            in_flight: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates the registry for the nickname held by `profile`, loading the
    /// profile first if needed.
    pub async fn activate(
        gateway: Arc<dyn CommandGateway>,
        profile: &ProfileStore,
    ) -> Result<Self, GatewayError> {
        let local = profile.init(gateway.as_ref()).await?;
        Ok(Self::new(gateway, local.nickname))
    }

    pub fn local_nickname(&self) -> String {
        self.local_nickname.read().clone()
    }

    /// Points the local device at a new nickname and republishes the
    /// snapshot. The next refresh reconciles against the new name.
    pub fn set_local_nickname(&self, nickname: impl Into<String>) {
        let nickname = nickname.into();
        {
            let mut current = self.local_nickname.write();
            if *current == nickname {
                return;
            }
            *current = nickname.clone();
        }

        let now = Utc::now();
        self.state.send_modify(|snapshot| {
            let devices = relabel_local(&snapshot.devices, &nickname, now);
            *snapshot = Arc::new(PresenceSnapshot {
                devices,
                ..(**snapshot).clone()
            });
        });
        tracing::info!(nickname = %nickname, "local nickname changed");
    }

    /// Reloads `profile` from the backend and follows a nickname change.
    pub async fn reload_profile(
        &self,
        profile: &ProfileStore,
    ) -> Result<LocalProfile, GatewayError> {
        let local = profile.reload(self.gateway.as_ref()).await?;
        self.set_local_nickname(local.nickname.clone());
        Ok(local)
    }

    pub fn snapshot(&self) -> Arc<PresenceSnapshot> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<PresenceSnapshot>> {
        self.state.subscribe()
    }

    /// Runs one presence refresh. At most one refresh is in flight at a
    /// time; a call made while another is pending returns `Skipped` without
    /// touching the gateway.
    pub async fn refresh(&self) -> RefreshOutcome {
        if self.is_closed() {
            return RefreshOutcome::Discarded;
        }

        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            tracing::debug!("presence refresh already in flight, skipping");
            return RefreshOutcome::Skipped;
        };

        let report = match self.gateway.peer_roster_and_paths().await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("presence refresh failed, keeping previous state: {}", e);
                return RefreshOutcome::Failed(e);
            }
        };

        if self.is_closed() {
            tracing::debug!("registry closed during refresh, discarding result");
            return RefreshOutcome::Discarded;
        }

        let now = Utc::now();
        // Reconcile against the published state so a concurrent rename is kept
        self.state.send_modify(|snapshot| {
            let local_nickname = self.local_nickname();
            let devices = reconcile(&snapshot.devices, &report.roster, &local_nickname, now);
            let next = PresenceSnapshot {
                devices,
                paths: report.paths,
                roster: report.roster,
                refreshed_at: Some(now),
            };
            tracing::debug!(
                online = next.online().count(),
                offline = next.offline().count(),
                "presence refreshed"
            );
            *snapshot = Arc::new(next);
        });
        RefreshOutcome::Applied
    }

    /// Tears the registry down. Later refreshes are no-ops and one still in
    /// flight drops its result.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // Wake subscribers so update streams see the close
            self.state.send_modify(|_| {});
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// Released on drop, so a refresh cancelled mid-call does not wedge the latch.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn entry(nickname: &str, peer_id: &str) -> RosterEntry {
        RosterEntry::new(nickname, peer_id, "linux")
    }

    #[test]
    fn test_reconcile_adds_marks_and_keeps() {
        let t0 = Utc::now();
        let t1 = t0 + TimeDelta::seconds(10);
        let t2 = t1 + TimeDelta::seconds(10);

        let devices = vec![Device::local("me", t0)];
        let devices = reconcile(&devices, &[entry("alice", "id1"), entry("bob", "id2")], "me", t1);
        assert_eq!(devices.len(), 3);
        assert!(devices.iter().all(|device| device.is_online));

        let devices = reconcile(&devices, &[entry("bob", "id2")], "me", t2);
        assert_eq!(devices.len(), 3);

        let alice = devices.iter().find(|d| d.nickname == "alice").unwrap();
        assert!(!alice.is_online);
        assert_eq!(alice.last_seen, Some(t1));

        let bob = devices.iter().find(|d| d.nickname == "bob").unwrap();
        assert!(bob.is_online);
        assert_eq!(bob.last_seen, Some(t2));
    }

    #[test]
    fn test_reconcile_never_drops_a_device() {
        let rosters: Vec<Vec<RosterEntry>> = vec![
            vec![entry("alice", "id1")],
            vec![],
            vec![entry("bob", "id2"), entry("carol", "id3")],
            vec![entry("alice", "id9")],
            vec![],
        ];

        let mut devices = vec![Device::local("me", Utc::now())];
        let mut seen: HashSet<String> = HashSet::from(["me".to_string()]);
        for roster in &rosters {
            devices = reconcile(&devices, roster, "me", Utc::now());
            seen.extend(roster.iter().map(|entry| entry.nickname.clone()));
            for nickname in &seen {
                assert!(devices.iter().any(|device| &device.nickname == nickname));
            }
            assert_eq!(devices.len(), seen.len());
        }
    }

    #[test]
    fn test_reconcile_keys_on_nickname_not_peer_id() {
        // Deliberate: a restarted peer with a fresh id is the same device.
        let devices = reconcile(&[], &[entry("alice", "id1")], "me", Utc::now());
        let devices = reconcile(&devices, &[entry("alice", "id7")], "me", Utc::now());

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "id1");
        assert!(devices[0].is_online);
    }

    #[test]
    fn test_reconcile_local_device_stays_online_and_unique() {
        let devices = vec![Device::local("me", Utc::now())];

        let devices = reconcile(&devices, &[], "me", Utc::now());
        assert!(devices[0].is_online);

        let devices = reconcile(&devices, &[entry("me", "self-id")], "me", Utc::now());
        assert_eq!(devices.len(), 1);
        assert_eq!(devices.iter().filter(|d| d.is_my_device).count(), 1);
    }

    #[test]
    fn test_relabel_moves_local_flag() {
        let devices = reconcile(
            &[Device::local("me", Utc::now())],
            &[entry("alice", "id1")],
            "me",
            Utc::now(),
        );

        let devices = relabel_local(&devices, "desk", Utc::now());
        assert_eq!(devices.len(), 3);
        let me = devices.iter().find(|d| d.nickname == "me").unwrap();
        assert!(!me.is_my_device);
        assert!(!me.is_online);
        let desk = devices.iter().find(|d| d.is_my_device).unwrap();
        assert_eq!(desk.nickname, "desk");
        assert!(desk.is_online);

        // Renaming to a known peer's nickname adopts that record
        let devices = relabel_local(&devices, "alice", Utc::now());
        assert_eq!(devices.len(), 3);
        assert_eq!(devices.iter().filter(|d| d.is_my_device).count(), 1);
        assert!(devices.iter().any(|d| d.nickname == "alice" && d.is_my_device));

        // And reconcile keeps following the current name
        let devices = reconcile(&devices, &[], "alice", Utc::now());
        assert!(devices.iter().find(|d| d.nickname == "alice").unwrap().is_online);
        assert!(!devices.iter().find(|d| d.nickname == "desk").unwrap().is_online);
    }

    #[test]
    fn test_reconcile_first_duplicate_nickname_wins() {
        let devices = reconcile(
            &[],
            &[entry("alice", "id1"), entry("alice", "id2")],
            "me",
            Utc::now(),
        );
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "id1");
    }

    #[test]
    fn test_snapshot_live_peer_id_prefers_roster() {
        let snapshot = PresenceSnapshot {
            devices: reconcile(&[], &[entry("alice", "id1")], "me", Utc::now()),
            roster: vec![entry("alice", "id7")],
            ..PresenceSnapshot::default()
        };
        assert_eq!(snapshot.live_peer_id("alice"), Some("id7"));

        let snapshot = PresenceSnapshot {
            roster: Vec::new(),
            ..snapshot
        };
        assert_eq!(snapshot.live_peer_id("alice"), Some("id1"));
        assert_eq!(snapshot.live_peer_id("nobody"), None);
    }

    #[test]
    fn test_in_flight_latch_releases_on_drop() {
        let flag = AtomicBool::new(false);
        let guard = InFlight::acquire(&flag);
        assert!(guard.is_some());
        assert!(InFlight::acquire(&flag).is_none());
        drop(guard);
        assert!(InFlight::acquire(&flag).is_some());
    }
}

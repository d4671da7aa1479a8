use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{LocalProfile, DEFAULT_BROWSE_ROOT};
use crate::error::GatewayError;
use crate::gateway::CommandGateway;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryItem {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub index: usize,
}

/// Walks the local filesystem through the gateway. Used to pick the file to
/// send and the folder a received file lands in.
pub struct LocalBrowser {
    gateway: Arc<dyn CommandGateway>,
    root: String,
    pub current_path: String,
    pub directory_items: Vec<DirectoryItem>,
    pub selected_index: Option<usize>,
    directory_cache: HashMap<String, Vec<DirectoryItem>>,
}

impl LocalBrowser {
    /// Browsing never goes above `root`.
    pub fn new(gateway: Arc<dyn CommandGateway>, root: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            gateway,
            current_path: root.clone(),
            root,
            directory_items: Vec::new(),
            selected_index: None,
            directory_cache: HashMap::new(),
        }
    }

    /// Starts in the profile's workspace, or the home folder while the
    /// profile is not loaded yet.
    pub fn for_profile(gateway: Arc<dyn CommandGateway>, profile: Option<&LocalProfile>) -> Self {
        let root = profile.map_or(DEFAULT_BROWSE_ROOT, |profile| profile.workspace.as_str());
        Self::new(gateway, root)
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub async fn populate_directory_items(&mut self) -> Result<(), GatewayError> {
        if let Some(cached_items) = self.directory_cache.get(&self.current_path) {
            self.directory_items = cached_items.clone();
            self.reset_selection();
            return Ok(());
        }

        let listing = self.gateway.list_local_entries(&self.current_path).await?;

        let mut items: Vec<DirectoryItem> = listing
            .folders
            .into_iter()
            .map(|name| self.create_directory_item(name, true))
            .chain(
                listing
                    .files
                    .into_iter()
                    .map(|name| self.create_directory_item(name, false)),
            )
            .collect();
        sort_items(&mut items);

        self.directory_cache
            .insert(self.current_path.clone(), items.clone());
        self.directory_items = items;
        self.reset_selection();
        Ok(())
    }

    /// Drops the cached listing of the current folder and lists it again.
    pub async fn reload(&mut self) -> Result<(), GatewayError> {
        self.directory_cache.remove(&self.current_path);
        self.populate_directory_items().await
    }

    pub fn navigate_next_file(&mut self) {
        if self.directory_items.is_empty() {
            return;
        }

        self.selected_index = match self.selected_index {
            Some(i) if i < self.directory_items.len() - 1 => Some(i + 1),
            None => Some(0),
            _ => self.selected_index,
        };
    }

    pub fn navigate_previous_file(&mut self) {
        if self.directory_items.is_empty() {
            return;
        }

        self.selected_index = match self.selected_index {
            Some(i) if i > 0 => Some(i - 1),
            None => Some(self.directory_items.len() - 1),
            _ => self.selected_index,
        };
    }

    pub fn selected_item(&self) -> Option<&DirectoryItem> {
        self.selected_index
            .and_then(|index| self.directory_items.get(index))
    }

    /// Full path of the selected entry when it is a file.
    pub fn selected_file(&self) -> Option<&str> {
        self.selected_item()
            .filter(|item| !item.is_dir)
            .map(|item| item.path.as_str())
    }

    pub async fn enter_directory(&mut self) -> Result<bool, GatewayError> {
        let Some(path) = self
            .selected_item()
            .filter(|item| item.is_dir)
            .map(|item| item.path.clone())
        else {
            return Ok(false);
        };

        self.go_to(path).await?;
        Ok(true)
    }

    pub async fn go_up_previous_directory(&mut self) -> Result<bool, GatewayError> {
        let root = self.root.trim_end_matches('/');
        let current = self.current_path.trim_end_matches('/');
        if current == root {
            return Ok(false);
        }

        // Anything outside the root snaps back to it
        let parent = match current.rsplit_once('/') {
            Some((parent, _)) if !parent.is_empty() && is_within(parent, root) => {
                parent.to_string()
            }
            _ => self.root.clone(),
        };

        self.go_to(parent).await?;
        Ok(true)
    }

    /// Lists `path` and makes it current. On failure nothing changes.
    pub async fn go_to(&mut self, path: impl Into<String>) -> Result<(), GatewayError> {
        let previous = std::mem::replace(&mut self.current_path, path.into());
        if let Err(e) = self.populate_directory_items().await {
            tracing::warn!("failed to list {}: {}", self.current_path, e);
            self.current_path = previous;
            return Err(e);
        }
        Ok(())
    }

    fn create_directory_item(&self, name: String, is_dir: bool) -> DirectoryItem {
        let path = format!("{}/{}", self.current_path.trim_end_matches('/'), name);
        DirectoryItem {
            name,
            path,
            is_dir,
            index: 0,
        }
    }

    fn reset_selection(&mut self) {
        self.selected_index = if self.directory_items.is_empty() {
            None
        } else {
            Some(0)
        };
    }
}

fn is_within(path: &str, root: &str) -> bool {
    path == root
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn sort_items(items: &mut [DirectoryItem]) {
    items.sort_by(|a, b| match (a.is_dir, b.is_dir) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });

    // Update indices for the new order
    for (i, item) in items.iter_mut().enumerate() {
        item.index = i;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_within_matches_whole_segments() {
        assert!(is_within("/home/me/ws", "/home/me/ws"));
        assert!(is_within("/home/me/ws/a", "/home/me/ws"));
        assert!(!is_within("/home/me/wsx", "/home/me/ws"));
        assert!(!is_within("/home/me", "/home/me/ws"));
        assert!(is_within("/home", ""));
    }
}

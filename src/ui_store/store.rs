use super::types::*;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

type Shared = Arc<RwLock<UiSnapshot>>;

/// Application-wide UI state. Created once at startup and handed out to
/// features through the narrow accessors below.
#[derive(Clone, Default)]
pub struct UiStore {
    state: Shared,
}

impl UiStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry_flags(&self) -> RetryFlags {
        RetryFlags {
            state: self.state.clone(),
        }
    }

    pub fn approval_forms(&self) -> ApprovalForms {
        ApprovalForms {
            state: self.state.clone(),
        }
    }

    pub fn navigation(&self) -> Navigation {
        Navigation {
            state: self.state.clone(),
        }
    }

    /// Drops everything tied to the current attempt.
    pub async fn reset_attempt_scope(&self) {
        let mut state = self.state.write().await;
        state.selected_process_id = None;
        state.selected_tab = DEFAULT_TAB.to_string();
        state.retrying_attempt_ids.clear();
        state.approval_forms.clear();
        debug!("ui attempt scope reset");
    }

    pub async fn snapshot(&self) -> UiSnapshot {
        self.state.read().await.clone()
    }
}

pub struct RetryFlags {
    state: Shared,
}

impl RetryFlags {
    pub async fn mark(&self, attempt_id: &str) {
        self.state
            .write()
            .await
            .retrying_attempt_ids
            .insert(attempt_id.to_string());
    }

    /// Clears the flag, reporting whether it was set.
    pub async fn take(&self, attempt_id: &str) -> bool {
        self.state.write().await.retrying_attempt_ids.remove(attempt_id)
    }
}

/// Approval form drafts keyed by conversation entry id
pub struct ApprovalForms {
    state: Shared,
}

impl ApprovalForms {
    pub async fn save(&self, entry_id: &str, form: serde_json::Value) {
        self.state
            .write()
            .await
            .approval_forms
            .insert(entry_id.to_string(), form);
    }

    pub async fn get(&self, entry_id: &str) -> Option<serde_json::Value> {
        self.state.read().await.approval_forms.get(entry_id).cloned()
    }

    pub async fn discard(&self, entry_id: &str) -> Option<serde_json::Value> {
        self.state.write().await.approval_forms.remove(entry_id)
    }
}

pub struct Navigation {
    state: Shared,
}

impl Navigation {
    pub async fn select_process(&self, process_id: Option<String>) {
        self.state.write().await.selected_process_id = process_id;
    }

    pub async fn selected_process(&self) -> Option<String> {
        self.state.read().await.selected_process_id.clone()
    }

    pub async fn select_tab(&self, tab: &str) {
        self.state.write().await.selected_tab = tab.to_string();
    }

    pub async fn selected_tab(&self) -> String {
        self.state.read().await.selected_tab.clone()
    }
}

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub const DEFAULT_TAB: &str = "conversation";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UiSnapshot {
    pub selected_process_id: Option<String>,
    pub selected_tab: String,
    pub retrying_attempt_ids: BTreeSet<String>,
    pub approval_forms: HashMap<String, serde_json::Value>,
}

impl Default for UiSnapshot {
    fn default() -> Self {
        Self {
            selected_process_id: None,
            selected_tab: DEFAULT_TAB.to_string(),
            retrying_attempt_ids: BTreeSet::new(),
            approval_forms: HashMap::new(),
        }
    }
}

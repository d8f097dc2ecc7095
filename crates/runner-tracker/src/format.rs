//! On-disk TOML shape for the local file-backed tracker: a `[plan]` +
//! `[[tasks]]` schema with name-keyed `depends_on`, read and written back
//! as a mutable task store a run can update status/data on.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackerToml {
    pub root: TaskToml,
    #[serde(default)]
    pub tasks: Vec<TaskToml>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskToml {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_status() -> String {
    "open".to_string()
}

//! Persisted wire format of a flow tree.
//!
//! ```json
//! {
//!   "intent": {"kind": "IntentLoginFlow", "data": {...}},
//!   "nodes": [
//!     {"type": "SIMPLE", "simple": {"kind": "NodeDoUseIdentity", "data": {...}}},
//!     {"type": "SUB_FLOW", "flow": {"intent": {...}, "nodes": [...]}}
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedDocument {
    pub kind: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDocument {
    pub intent: TaggedDocument,
    #[serde(default)]
    pub nodes: Vec<NodeDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeDocument {
    Simple { simple: TaggedDocument },
    SubFlow { flow: FlowDocument },
}

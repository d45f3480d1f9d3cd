use authflow_core::flow::{Flow, FlowReference};
use authflow_core::intent::Intent;

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A flow tree being evaluated on behalf of one session.
#[derive(Debug)]
pub struct FlowInstance {
    pub flow_id: String,
    pub instance_id: String,
    pub state_token: String,
    pub flow_reference: FlowReference,
    pub flow: Flow,
}

impl FlowInstance {
    pub fn new(flow_id: impl Into<String>, flow_reference: FlowReference, intent: Box<dyn Intent>) -> Self {
        Self {
            flow_id: flow_id.into(),
            instance_id: new_id(),
            state_token: new_id(),
            flow_reference,
            flow: Flow::from_boxed(intent),
        }
    }

    pub fn regenerate_state_token(&mut self) {
        self.state_token = new_id();
    }
}

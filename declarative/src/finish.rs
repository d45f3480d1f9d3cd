use crate::deps::DepsExt;
use crate::milestones::DoFinish;
use crate::model::Event;
use async_trait::async_trait;
use authflow_core::context::Context;
use authflow_core::effect::DelayedOneTimeFunction;
use authflow_core::error::FlowError;
use authflow_core::intent::{Kind, NodeSimple};
use authflow_core::milestone::MilestoneRequest;
use serde::{Deserialize, Serialize};

/// The event a finished flow announces. Dispatched exactly once, after the step that
/// appended it committed; the owning flow pauses until then.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDoDispatchEvent {
    pub event: Event,
    #[serde(default)]
    pub invoked: bool,
}

impl NodeDoDispatchEvent {
    pub fn new(event: Event) -> Self {
        Self {
            event,
            invoked: false,
        }
    }
}

impl Kind for NodeDoDispatchEvent {
    const KIND: &'static str = "NodeDoDispatchEvent";
}

impl NodeSimple for NodeDoDispatchEvent {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request.provide(|| DoFinish {
            invoked: self.invoked,
        });
    }

    fn delayed(&self) -> Option<&dyn DelayedOneTimeFunction> {
        Some(self)
    }

    fn delayed_mut(&mut self) -> Option<&mut dyn DelayedOneTimeFunction> {
        Some(self)
    }
}

#[async_trait]
impl DelayedOneTimeFunction for NodeDoDispatchEvent {
    fn invoked(&self) -> bool {
        self.invoked
    }

    fn set_invoked(&mut self, invoked: bool) {
        self.invoked = invoked;
    }

    async fn invoke(&self, ctx: &Context) -> Result<(), FlowError> {
        ctx.events()?.dispatch_event_without_tx(&self.event).await
    }
}

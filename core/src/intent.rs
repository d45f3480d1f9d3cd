//! # Reaction Protocol
//!
//! Every decision point in a flow tree implements [`InputReactor`]:
//!
//! * `can_react_to` tells the driver what the step needs next: client input matching a
//!   schema, nothing at all (automatic), or that the flow is finished.
//! * `react_to` consumes the validated input (or none) and proposes the next node.
//!
//! ## Design Philosophy
//!
//! Reactors never mutate the tree. They read dependencies from the [`Context`] and
//! return an [`Outcome`]; the driver owns appending, effects and persistence.
//!
//! Payloads are polymorphic. Each concrete type carries a stable [`Kind`] tag that the
//! [`Registry`](crate::registry::Registry) uses to rebuild it from the persisted tree.

use crate::context::Context;
use crate::effect::{DelayedOneTimeFunction, Effect};
use crate::error::FlowError;
use crate::flow::Flows;
use crate::input::Input;
use crate::milestone::MilestoneRequest;
use crate::outcome::{Outcome, Reaction};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;

/// Stable serialization tag of a payload type. Tags are unique across intents and nodes.
pub trait Kind {
    const KIND: &'static str;
}

/// Object-safe view of a tagged payload.
pub trait Tagged: Any + Send + Sync {
    fn kind(&self) -> &'static str;
    fn to_data(&self) -> Result<Value, serde_json::Error>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> Tagged for T
where
    T: Kind + Serialize + Send + Sync + 'static,
{
    fn kind(&self) -> &'static str {
        T::KIND
    }

    fn to_data(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[async_trait]
pub trait InputReactor: Send + Sync {
    async fn can_react_to(&self, ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError>;

    async fn react_to(
        &self,
        ctx: &Context,
        flows: Flows<'_>,
        input: Option<&Input>,
    ) -> Result<Outcome, FlowError>;

    /// Extra data returned to the client alongside a pending schema.
    async fn output_data(&self, _ctx: &Context, _flows: Flows<'_>) -> Result<Value, FlowError> {
        Ok(Value::Object(Map::new()))
    }
}

/// Decision-maker owning one flow's progression.
pub trait Intent: Tagged + InputReactor {
    fn milestones(&self, _request: &mut MilestoneRequest) {}

    fn effects(&self, _ctx: &Context, _flows: Flows<'_>) -> Result<Vec<Effect>, FlowError> {
        Ok(Vec::new())
    }
}

/// A terminal fact recorded in a flow.
///
/// A simple node may itself ask for input (it then returns `Some` from [`reactor`](Self::reactor)),
/// and may carry a deferred one-time function.
pub trait NodeSimple: Tagged {
    fn milestones(&self, _request: &mut MilestoneRequest) {}

    fn effects(&self, _ctx: &Context, _flows: Flows<'_>) -> Result<Vec<Effect>, FlowError> {
        Ok(Vec::new())
    }

    fn reactor(&self) -> Option<&dyn InputReactor> {
        None
    }

    fn delayed(&self) -> Option<&dyn DelayedOneTimeFunction> {
        None
    }

    fn delayed_mut(&mut self) -> Option<&mut dyn DelayedOneTimeFunction> {
        None
    }
}

impl fmt::Debug for dyn Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Intent({})", self.kind())
    }
}

impl fmt::Debug for dyn NodeSimple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.kind())
    }
}

/// Downcast helper for intents.
pub fn downcast_intent<T: Intent>(intent: &dyn Intent) -> Option<&T> {
    intent.as_any().downcast_ref::<T>()
}

/// Downcast helper for simple nodes.
pub fn downcast_node<T: NodeSimple>(node: &dyn NodeSimple) -> Option<&T> {
    node.as_any().downcast_ref::<T>()
}

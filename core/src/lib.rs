//! # authflow-core
//!
//! The flow execution model: a tree of intents and nodes negotiating input with a client
//! one step at a time.
//!
//! * [`flow`] - the tree, paths and references
//! * [`intent`] - the reaction protocol every decision point implements
//! * [`outcome`] - reactions and outcomes, including flow-control signals
//! * [`milestone`] - capability queries over the tree
//! * [`effect`] - side effects and one-time deferred functions
//! * [`registry`] / [`document`] - persisted wire format

pub mod bus;
pub mod context;
pub mod document;
pub mod effect;
pub mod error;
pub mod flow;
pub mod input;
pub mod intent;
pub mod jsonpointer;
pub mod milestone;
pub mod outcome;
pub mod registry;
pub mod schema;

pub use bus::Bus;
pub use context::Context;
pub use error::{ApiError, ErrorKind, FlowError, ValidationError};
pub use flow::{Flow, FlowFactory, FlowReference, FlowType, Flows, Node, NodePath};
pub use outcome::{Outcome, Reaction};
pub use registry::Registry;

pub mod prelude {
    pub use crate::bus::Bus;
    pub use crate::context::Context;
    pub use crate::effect::{DelayedOneTimeFunction, Effect};
    pub use crate::error::{ApiError, ErrorKind, FlowError};
    pub use crate::flow::{Flow, FlowFactory, FlowReference, FlowType, Flows, Node, NodePath};
    pub use crate::input::{Input, InputSchema};
    pub use crate::intent::{InputReactor, Intent, Kind, NodeSimple, Tagged};
    pub use crate::jsonpointer::JsonPointer;
    pub use crate::milestone::{
        DoUseUser, Milestone, MilestoneRequest, find_all_milestones, find_milestone,
        find_milestone_in_current_flow, get_user_id,
    };
    pub use crate::outcome::{
        BotProtectionStatus, BotProtectionVerification, Outcome, Reaction, RewriteFlow, SwitchFlow,
    };
    pub use crate::registry::Registry;
}

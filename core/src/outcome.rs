use crate::flow::{FlowReference, Node};
use crate::input::{Input, InputSchema};
use crate::intent::{Intent, NodeSimple};
use serde::{Deserialize, Serialize};

/// Answer of [`can_react_to`](crate::intent::InputReactor::can_react_to).
#[derive(Debug)]
pub enum Reaction {
    /// The step needs client input matching the schema.
    Input(InputSchema),
    /// The step reacts without input; the driver calls `react_to` immediately.
    Automatic,
    /// This flow is finished; the driver ascends to the parent intent.
    Eof,
    /// A one-time external effect is still in flight; the driver retries internally.
    PauseAndRetry,
}

impl Reaction {
    pub fn schema(&self) -> Option<&InputSchema> {
        match self {
            Reaction::Input(schema) => Some(schema),
            _ => None,
        }
    }
}

/// The explicit result of a reaction.
///
/// `Outcome` represents "Control Flow as Data". Redirecting the evaluation (switching to
/// another flow, rewriting the root) is returned to the driver like any other result
/// instead of unwinding through errors.
#[derive(Debug)]
pub enum Outcome {
    /// Append a node (simple or sub-flow) to the reacting flow and continue.
    Next(Node),

    /// Replace the last node of the reacting flow and stop.
    Replace(Node),

    /// Nothing appended, but the state changed; stop.
    Same,

    /// The input does not fit this decision point.
    Incompatible,

    /// Abandon this flow and start a different named flow.
    SwitchFlow(SwitchFlow),

    /// Replace the root intent and nodes in place.
    RewriteFlow(RewriteFlow),

    /// Result of a bot-protection verification.
    BotProtection(BotProtectionVerification),
}

impl Outcome {
    pub fn simple(node: impl NodeSimple) -> Self {
        Outcome::Next(Node::simple(node))
    }

    pub fn sub_flow(intent: impl Intent) -> Self {
        Outcome::Next(Node::sub_flow(intent))
    }
}

#[derive(Debug)]
pub struct SwitchFlow {
    pub reference: FlowReference,
    pub synthetic_input: Input,
}

#[derive(Debug)]
pub struct RewriteFlow {
    pub intent: Box<dyn Intent>,
    pub nodes: Vec<Node>,
    pub synthetic_input: Input,
}

#[derive(Debug)]
pub enum BotProtectionVerification {
    /// Record the node and proceed.
    Verified(Node),
    /// Record the node, then reject with a recoverable error.
    Failed(Node),
    /// Record nothing; the same step is offered again.
    ServiceUnavailable,
}

impl BotProtectionVerification {
    pub fn status(&self) -> BotProtectionStatus {
        match self {
            BotProtectionVerification::Verified(_) => BotProtectionStatus::Verified,
            BotProtectionVerification::Failed(_) => BotProtectionStatus::Failed,
            BotProtectionVerification::ServiceUnavailable => BotProtectionStatus::ServiceUnavailable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotProtectionStatus {
    Verified,
    Failed,
    ServiceUnavailable,
}

//! # Accept: the evaluation driver
//!
//! One call to [`accept`] advances a flow tree as far as the given input allows:
//!
//! 1. find the frontier reactor (descending through trailing sub-flows, ascending on EOF)
//! 2. build its input (raw input is validated against the frontier schema, synthetic
//!    input is passed through)
//! 3. react, and interpret the [`Outcome`]
//!
//! The same raw input is offered to every step the loop reaches, so one submission can
//! carry the data of several consecutive steps.
//!
//! Switching and rewriting flows are returned to the caller, which owns the factory that
//! builds new roots.

use crate::instance::FlowInstance;
use authflow_core::context::Context;
use authflow_core::effect::Effect;
use authflow_core::error::{ApiError, ErrorKind, FlowError};
use authflow_core::flow::{Flow, Flows, Node, NodePath};
use authflow_core::input::Input;
use authflow_core::intent::InputReactor;
use authflow_core::outcome::{
    BotProtectionStatus, BotProtectionVerification, Outcome, Reaction, RewriteFlow, SwitchFlow,
};
use serde_json::Value;
use tracing::{Instrument, debug, info_span, warn};

/// Upper bound of react iterations in one call.
pub const MAX_LOOP: usize = 100;

#[derive(Debug, Clone)]
pub enum AcceptInput {
    /// Client input, validated against each step's schema. `None` only drives automatic steps.
    Raw(Option<Value>),
    /// Server-built input replayed without validation.
    Synthetic(Input),
}

/// Everything collected while accepting, beyond the tree itself.
#[derive(Debug, Default)]
pub struct AcceptResult {
    pub bot_protection: Option<BotProtectionStatus>,
    /// Run effects in proposal order, applied by the caller right before its step commits.
    pub run: Vec<Effect>,
    /// OnCommit effects in proposal order.
    pub on_commit: Vec<Effect>,
    /// Nodes appended with a pending one-time function.
    pub delayed: Vec<NodePath>,
}

#[derive(Debug)]
pub enum AcceptOutcome {
    /// The tree changed and now waits for input.
    Pending,
    /// The input did not change anything.
    NoChange,
    /// The whole tree is finished.
    Eof,
    /// A one-time function is in flight; retry once it ran.
    Paused,
    /// The tree changed, but the submission must be rejected with this error.
    Rejected(FlowError),
    SwitchFlow(SwitchFlow),
    RewriteFlow(RewriteFlow),
}

pub(crate) struct ReactorLocation {
    /// Sub-flow indices of the flow owning the reactor.
    pub path: Vec<usize>,
    /// Index of a reactive simple node in that flow; `None` for the flow's intent.
    pub node: Option<usize>,
    pub reaction: Reaction,
}

pub(crate) enum Frontier {
    Reactor(ReactorLocation),
    Eof,
    Paused,
}

pub(crate) async fn find_input_reactor(ctx: &Context, root: &Flow) -> Result<Frontier, FlowError> {
    let mut chain: Vec<(&Flow, Vec<usize>)> = vec![(root, Vec::new())];
    let mut current = root;
    let mut path = Vec::new();
    while let Some(Node::SubFlow(child)) = current.nodes.last() {
        path.push(current.nodes.len() - 1);
        chain.push((child, path.clone()));
        current = child;
    }

    for (flow, path) in chain.into_iter().rev() {
        let flows = Flows::new(root).replace(flow);

        if let Some(Node::Simple(simple)) = flow.nodes.last() {
            if let Some(reactor) = simple.reactor() {
                match reactor.can_react_to(ctx, flows).await? {
                    Reaction::Eof => {}
                    Reaction::PauseAndRetry => return Ok(Frontier::Paused),
                    reaction => {
                        return Ok(Frontier::Reactor(ReactorLocation {
                            path,
                            node: Some(flow.nodes.len() - 1),
                            reaction,
                        }));
                    }
                }
            }
        }

        match flow.intent.can_react_to(ctx, flows).await? {
            Reaction::Eof => continue,
            Reaction::PauseAndRetry => return Ok(Frontier::Paused),
            reaction => {
                return Ok(Frontier::Reactor(ReactorLocation {
                    path,
                    node: None,
                    reaction,
                }));
            }
        }
    }
    Ok(Frontier::Eof)
}

pub(crate) fn reactor_at<'a>(
    root: &'a Flow,
    location: &ReactorLocation,
) -> Result<(&'a dyn InputReactor, Flows<'a>), FlowError> {
    let flow = root
        .flow_at(&location.path)
        .ok_or_else(|| FlowError::internal("reacting flow is no longer in the tree"))?;
    let reactor: &dyn InputReactor = match location.node {
        Some(idx) => flow
            .nodes
            .get(idx)
            .and_then(Node::as_simple)
            .and_then(|simple| simple.reactor())
            .ok_or_else(|| FlowError::internal("reacting node is no longer in the tree"))?,
        None => flow.intent.as_ref() as &dyn InputReactor,
    };
    Ok((reactor, Flows::new(root).replace(flow)))
}

pub fn bot_protection_failed() -> FlowError {
    ApiError::invalid(
        "BotProtectionVerificationFailed",
        "bot protection verification failed",
    )
    .into()
}

pub fn bot_protection_unavailable() -> FlowError {
    ApiError::new(
        ErrorKind::ServiceUnavailable,
        "BotProtectionServiceUnavailable",
        "bot protection service is unavailable",
    )
    .into()
}

/// Advance `instance` with `input`.
pub async fn accept(
    ctx: &Context,
    instance: &mut FlowInstance,
    input: AcceptInput,
    result: &mut AcceptResult,
    max_loop: usize,
) -> Result<AcceptOutcome, FlowError> {
    let span = info_span!(
        "accept",
        authflow.flow = %ctx.flow_reference(),
        authflow.instance = %instance.instance_id,
    );
    async move {
        let mut changed = false;
        let mut iterations = 0usize;

        let outcome = loop {
            iterations += 1;
            if iterations > max_loop {
                warn!(max_loop, "accept loop limit reached");
                return Err(FlowError::internal(format!(
                    "accept loop exceeded {max_loop} iterations"
                )));
            }

            let location = match find_input_reactor(ctx, &instance.flow).await? {
                Frontier::Eof => break AcceptOutcome::Eof,
                Frontier::Paused => break AcceptOutcome::Paused,
                Frontier::Reactor(location) => location,
            };

            let step_input = match &input {
                AcceptInput::Synthetic(synthetic) => Some(synthetic.clone()),
                AcceptInput::Raw(raw) => match (raw, location.reaction.schema()) {
                    (Some(raw), Some(schema)) => match schema.make_input(raw) {
                        Ok(input) => Some(input),
                        Err(FlowError::Validation(err)) if changed => {
                            debug!(%err, pointer = %schema.json_pointer(), "input does not cover the next step");
                            break AcceptOutcome::Pending;
                        }
                        Err(err) => return Err(err),
                    },
                    (None, Some(_)) => {
                        break if changed {
                            AcceptOutcome::Pending
                        } else {
                            AcceptOutcome::NoChange
                        };
                    }
                    _ => None,
                },
            };

            let outcome = {
                let (reactor, flows) = reactor_at(&instance.flow, &location)?;
                reactor.react_to(ctx, flows, step_input.as_ref()).await?
            };

            match outcome {
                Outcome::Next(node) => {
                    append_node(ctx, &mut instance.flow, &location.path, node, result)?;
                    changed = true;
                }
                Outcome::Replace(node) => {
                    replace_last_node(&mut instance.flow, &location.path, node)?;
                    changed = true;
                    break AcceptOutcome::Pending;
                }
                Outcome::Same => {
                    changed = true;
                    break AcceptOutcome::Pending;
                }
                Outcome::Incompatible => {
                    break if changed {
                        AcceptOutcome::Pending
                    } else {
                        AcceptOutcome::NoChange
                    };
                }
                Outcome::SwitchFlow(switch) => return Ok(AcceptOutcome::SwitchFlow(switch)),
                Outcome::RewriteFlow(rewrite) => return Ok(AcceptOutcome::RewriteFlow(rewrite)),
                Outcome::BotProtection(verification) => {
                    result.bot_protection = Some(verification.status());
                    changed = true;
                    match verification {
                        BotProtectionVerification::Verified(node) => {
                            append_node(ctx, &mut instance.flow, &location.path, node, result)?;
                        }
                        BotProtectionVerification::Failed(node) => {
                            append_node(ctx, &mut instance.flow, &location.path, node, result)?;
                            break AcceptOutcome::Rejected(bot_protection_failed());
                        }
                        BotProtectionVerification::ServiceUnavailable => {
                            break AcceptOutcome::Rejected(bot_protection_unavailable());
                        }
                    }
                }
            }
        };

        if changed {
            instance.regenerate_state_token();
        }
        debug!(iterations, changed, ?outcome, "accept finished");
        Ok(outcome)
    }
    .instrument(span)
    .await
}

fn append_node(
    ctx: &Context,
    root: &mut Flow,
    path: &[usize],
    node: Node,
    result: &mut AcceptResult,
) -> Result<(), FlowError> {
    let kind = node.kind();
    let flow = root
        .flow_at_mut(path)
        .ok_or_else(|| FlowError::internal("reacting flow is no longer in the tree"))?;
    let mut node_path = path.to_vec();
    node_path.push(flow.nodes.len());
    flow.nodes.push(node);
    debug!(kind, path = ?node_path, "node appended");

    let effects = {
        let owner = root
            .flow_at(path)
            .ok_or_else(|| FlowError::internal("reacting flow is no longer in the tree"))?;
        let flows = Flows::new(root).replace(owner);
        match owner.nodes.last() {
            Some(Node::Simple(simple)) => {
                if simple.delayed().is_some_and(|delayed| !delayed.invoked()) {
                    result.delayed.push(node_path);
                }
                simple.effects(ctx, flows)?
            }
            Some(Node::SubFlow(sub)) => sub.intent.effects(ctx, flows.replace(sub))?,
            None => Vec::new(),
        }
    };

    for effect in effects {
        if effect.is_on_commit() {
            result.on_commit.push(effect);
        } else {
            result.run.push(effect);
        }
    }
    Ok(())
}

fn replace_last_node(root: &mut Flow, path: &[usize], node: Node) -> Result<(), FlowError> {
    let last = root
        .flow_at_mut(path)
        .and_then(|flow| flow.nodes.last_mut())
        .ok_or_else(|| FlowError::internal("no node to replace"))?;
    debug!(from = last.kind(), to = node.kind(), "node replaced");
    *last = node;
    Ok(())
}

//! # Milestones
//!
//! A milestone is an optional capability a payload may expose: "records a used identity",
//! "records the chosen authentication method". Presence is queried, never assumed.
//!
//! Payloads answer a [`MilestoneRequest`] by offering values; the request keeps the one
//! whose type was asked for.
//!
//! ## Scopes
//!
//! * Whole tree ([`find_milestone`], [`find_all_milestones`]): pre-order from the given flow,
//!   crossing sub-flow boundaries. The first match wins.
//! * Current flow ([`find_milestone_in_current_flow`]): the nearest intent and the direct
//!   children of the nearest flow. Nodes inside a sub-flow are never inspected.

use crate::error::FlowError;
use crate::flow::{Flow, Flows, Node};
use crate::intent::{Intent, NodeSimple};
use std::any::{Any, TypeId};
use std::convert::Infallible;
use std::marker::PhantomData;
use std::ops::ControlFlow;

pub trait Milestone: Any + Send {}

pub struct MilestoneRequest {
    wanted: TypeId,
    found: Option<Box<dyn Any + Send>>,
}

impl MilestoneRequest {
    fn new<M: Milestone>() -> Self {
        Self {
            wanted: TypeId::of::<M>(),
            found: None,
        }
    }

    /// Offer a milestone. `make` only runs when `M` is the requested type.
    pub fn provide<M: Milestone>(&mut self, make: impl FnOnce() -> M) -> &mut Self {
        if self.found.is_none() && self.wanted == TypeId::of::<M>() {
            self.found = Some(Box::new(make()));
        }
        self
    }

    fn take<M: Milestone>(self) -> Option<M> {
        self.found
            .and_then(|found| found.downcast::<M>().ok())
            .map(|boxed| *boxed)
    }
}

pub fn intent_milestone<M: Milestone>(intent: &dyn Intent) -> Option<M> {
    let mut request = MilestoneRequest::new::<M>();
    intent.milestones(&mut request);
    request.take()
}

pub fn node_milestone<M: Milestone>(node: &dyn NodeSimple) -> Option<M> {
    let mut request = MilestoneRequest::new::<M>();
    node.milestones(&mut request);
    request.take()
}

/// Depth-first visitor over a flow tree.
pub trait Visitor {
    type Break;

    fn visit_intent(&mut self, _intent: &dyn Intent, _flow: &Flow) -> ControlFlow<Self::Break> {
        ControlFlow::Continue(())
    }

    fn visit_node(&mut self, _node: &dyn NodeSimple, _owner: &Flow) -> ControlFlow<Self::Break> {
        ControlFlow::Continue(())
    }
}

pub fn traverse_flow<V: Visitor + ?Sized>(visitor: &mut V, flow: &Flow) -> ControlFlow<V::Break> {
    visitor.visit_intent(flow.intent.as_ref(), flow)?;
    for node in &flow.nodes {
        traverse_node(visitor, flow, node)?;
    }
    ControlFlow::Continue(())
}

pub fn traverse_node<V: Visitor + ?Sized>(
    visitor: &mut V,
    owner: &Flow,
    node: &Node,
) -> ControlFlow<V::Break> {
    match node {
        Node::Simple(simple) => visitor.visit_node(simple.as_ref(), owner),
        Node::SubFlow(flow) => traverse_flow(visitor, flow),
    }
}

struct FirstMatch<M>(PhantomData<M>);

impl<M: Milestone> Visitor for FirstMatch<M> {
    type Break = M;

    fn visit_intent(&mut self, intent: &dyn Intent, _flow: &Flow) -> ControlFlow<M> {
        match intent_milestone::<M>(intent) {
            Some(found) => ControlFlow::Break(found),
            None => ControlFlow::Continue(()),
        }
    }

    fn visit_node(&mut self, node: &dyn NodeSimple, _owner: &Flow) -> ControlFlow<M> {
        match node_milestone::<M>(node) {
            Some(found) => ControlFlow::Break(found),
            None => ControlFlow::Continue(()),
        }
    }
}

struct AllMatches<M>(Vec<M>);

impl<M: Milestone> Visitor for AllMatches<M> {
    type Break = Infallible;

    fn visit_intent(&mut self, intent: &dyn Intent, _flow: &Flow) -> ControlFlow<Infallible> {
        self.0.extend(intent_milestone::<M>(intent));
        ControlFlow::Continue(())
    }

    fn visit_node(&mut self, node: &dyn NodeSimple, _owner: &Flow) -> ControlFlow<Infallible> {
        self.0.extend(node_milestone::<M>(node));
        ControlFlow::Continue(())
    }
}

pub fn find_milestone<M: Milestone>(flow: &Flow) -> Option<M> {
    traverse_flow(&mut FirstMatch::<M>(PhantomData), flow).break_value()
}

pub fn find_all_milestones<M: Milestone>(flow: &Flow) -> Vec<M> {
    let mut visitor = AllMatches::<M>(Vec::new());
    let _ = traverse_flow(&mut visitor, flow);
    visitor.0
}

/// Search the nearest flow without descending into its sub-flows.
///
/// A match on a direct sub-flow's intent returns that sub-flow as the new `nearest`.
pub fn find_milestone_in_current_flow<'a, M: Milestone>(flows: Flows<'a>) -> Option<(M, Flows<'a>)> {
    let nearest = flows.nearest;
    if let Some(found) = intent_milestone::<M>(nearest.intent.as_ref()) {
        return Some((found, flows));
    }
    for node in &nearest.nodes {
        match node {
            Node::Simple(simple) => {
                if let Some(found) = node_milestone::<M>(simple.as_ref()) {
                    return Some((found, flows));
                }
            }
            Node::SubFlow(sub) => {
                if let Some(found) = intent_milestone::<M>(sub.intent.as_ref()) {
                    return Some((found, flows.replace(sub)));
                }
            }
        }
    }
    None
}

/// Records that the flow acts on behalf of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoUseUser(pub String);

impl Milestone for DoUseUser {}

/// The single user id recorded anywhere in the tree.
pub fn get_user_id(flows: Flows<'_>) -> Result<String, FlowError> {
    let mut found: Option<String> = None;
    for DoUseUser(user_id) in find_all_milestones::<DoUseUser>(flows.root) {
        match &found {
            Some(existing) if *existing != user_id => return Err(FlowError::DifferentUserId),
            Some(_) => {}
            None => found = Some(user_id),
        }
    }
    found.ok_or(FlowError::NoUserId)
}

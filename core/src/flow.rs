//! # Flow Tree
//!
//! A [`Flow`] owns exactly one [`Intent`] and an append-only list of [`Node`]s. A node is
//! either a simple fact or a nested sub-flow with its own intent.
//!
//! Once appended, a node is history. The only in-place mutation allowed is flipping the
//! invoked flag of a node's [`DelayedOneTimeFunction`](crate::effect::DelayedOneTimeFunction),
//! addressed through a [`NodePath`].

use crate::context::Context;
use crate::document::{FlowDocument, NodeDocument, TaggedDocument};
use crate::error::FlowError;
use crate::intent::{Intent, NodeSimple};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Signup,
    Login,
    Reauth,
    AccountRecovery,
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowType::Signup => "signup",
            FlowType::Login => "login",
            FlowType::Reauth => "reauth",
            FlowType::AccountRecovery => "account_recovery",
        };
        f.write_str(name)
    }
}

/// Selects a configured flow definition, e.g. `login/default`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowReference {
    #[serde(rename = "type")]
    pub flow_type: FlowType,
    pub name: String,
}

impl FlowReference {
    pub fn new(flow_type: FlowType, name: impl Into<String>) -> Self {
        Self {
            flow_type,
            name: name.into(),
        }
    }
}

impl fmt::Display for FlowReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.flow_type, self.name)
    }
}

/// Creates the root intent of a named flow.
pub trait FlowFactory: Send + Sync {
    fn create(&self, ctx: &Context, reference: &FlowReference) -> Result<Box<dyn Intent>, FlowError>;
}

/// Observes submissions rejected with an error, after the step was rolled back.
///
/// `root` is the tree as evaluated, including the nodes the rejected step appended.
#[async_trait]
pub trait RejectionHook: Send + Sync {
    async fn rejected(&self, ctx: &Context, root: &Flow, err: &FlowError);
}

/// Indices from the root down to a node; every index but the last selects a sub-flow.
pub type NodePath = Vec<usize>;

#[derive(Debug)]
pub enum Node {
    Simple(Box<dyn NodeSimple>),
    SubFlow(Flow),
}

impl Node {
    pub fn simple(node: impl NodeSimple) -> Self {
        Node::Simple(Box::new(node))
    }

    pub fn sub_flow(intent: impl Intent) -> Self {
        Node::SubFlow(Flow::new(intent))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Simple(simple) => simple.kind(),
            Node::SubFlow(flow) => flow.intent.kind(),
        }
    }

    pub fn as_simple(&self) -> Option<&dyn NodeSimple> {
        match self {
            Node::Simple(simple) => Some(simple.as_ref()),
            Node::SubFlow(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct Flow {
    pub intent: Box<dyn Intent>,
    pub nodes: Vec<Node>,
}

impl Flow {
    pub fn new(intent: impl Intent) -> Self {
        Self::from_boxed(Box::new(intent))
    }

    pub fn from_boxed(intent: Box<dyn Intent>) -> Self {
        Self {
            intent,
            nodes: Vec::new(),
        }
    }

    /// The flow reached by following sub-flow indices.
    pub fn flow_at(&self, path: &[usize]) -> Option<&Flow> {
        path.iter().try_fold(self, |flow, idx| match flow.nodes.get(*idx)? {
            Node::SubFlow(child) => Some(child),
            Node::Simple(_) => None,
        })
    }

    pub fn flow_at_mut(&mut self, path: &[usize]) -> Option<&mut Flow> {
        let mut flow = self;
        for idx in path {
            flow = match flow.nodes.get_mut(*idx)? {
                Node::SubFlow(child) => child,
                Node::Simple(_) => return None,
            };
        }
        Some(flow)
    }

    pub fn node_at(&self, path: &[usize]) -> Option<&Node> {
        let (last, parents) = path.split_last()?;
        self.flow_at(parents)?.nodes.get(*last)
    }

    pub fn node_at_mut(&mut self, path: &[usize]) -> Option<&mut Node> {
        let (last, parents) = path.split_last()?;
        self.flow_at_mut(parents)?.nodes.get_mut(*last)
    }

    pub fn to_document(&self) -> Result<FlowDocument, FlowError> {
        let intent = TaggedDocument {
            kind: self.intent.kind().to_string(),
            data: self.intent.to_data()?,
        };
        let nodes = self
            .nodes
            .iter()
            .map(|node| match node {
                Node::Simple(simple) => Ok(NodeDocument::Simple {
                    simple: TaggedDocument {
                        kind: simple.kind().to_string(),
                        data: simple.to_data()?,
                    },
                }),
                Node::SubFlow(flow) => Ok(NodeDocument::SubFlow {
                    flow: flow.to_document()?,
                }),
            })
            .collect::<Result<Vec<_>, FlowError>>()?;
        Ok(FlowDocument { intent, nodes })
    }
}

/// The root of the tree plus the flow currently being evaluated.
#[derive(Debug, Clone, Copy)]
pub struct Flows<'a> {
    pub root: &'a Flow,
    pub nearest: &'a Flow,
}

impl<'a> Flows<'a> {
    pub fn new(root: &'a Flow) -> Self {
        Self {
            root,
            nearest: root,
        }
    }

    pub fn replace(self, nearest: &'a Flow) -> Self {
        Self {
            root: self.root,
            nearest,
        }
    }
}

/// Indented list of kinds, one line per intent or simple node.
pub fn outline(flow: &Flow) -> Vec<String> {
    fn walk(flow: &Flow, depth: usize, lines: &mut Vec<String>) {
        lines.push(format!("{}{}", "  ".repeat(depth), flow.intent.kind()));
        for node in &flow.nodes {
            match node {
                Node::Simple(simple) => {
                    lines.push(format!("{}{}", "  ".repeat(depth + 1), simple.kind()));
                }
                Node::SubFlow(child) => walk(child, depth + 1, lines),
            }
        }
    }

    let mut lines = Vec::new();
    walk(flow, 0, &mut lines);
    lines
}

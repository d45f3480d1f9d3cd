//! A small flow used by the driver tests.
//!
//! `IntentToyRoot` asks for a name, optionally a color, then appends a notification node
//! carrying a one-time function and pauses until it ran.

use async_trait::async_trait;
use authflow_core::bus::Bus;
use authflow_core::context::Context;
use authflow_core::effect::{DelayedOneTimeFunction, Effect};
use authflow_core::error::FlowError;
use authflow_core::flow::{FlowFactory, FlowReference, FlowType, Flows, Node};
use authflow_core::input::{Input, InputSchema};
use authflow_core::intent::{InputReactor, Intent, Kind, NodeSimple, downcast_node};
use authflow_core::jsonpointer::JsonPointer;
use authflow_core::outcome::{
    BotProtectionVerification, Outcome, Reaction, RewriteFlow, SwitchFlow,
};
use authflow_core::registry::Registry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct ToySwitches {
    pub run_effects: AtomicUsize,
    pub fail_run: AtomicBool,
    pub notified: AtomicUsize,
    pub fail_notify: AtomicBool,
    pub bot_unavailable: AtomicBool,
    pub committed: Mutex<Vec<String>>,
}

pub fn toy_bus() -> (Bus, Arc<ToySwitches>) {
    let switches = Arc::new(ToySwitches::default());
    (Bus::new().with(switches.clone()), switches)
}

pub fn toy_context() -> (Context, Arc<ToySwitches>) {
    let (bus, switches) = toy_bus();
    (
        Context::new(Arc::new(bus), FlowReference::new(FlowType::Login, "default")),
        switches,
    )
}

pub fn toy_registry() -> Registry {
    Registry::builder()
        .intent::<IntentToyRoot>()
        .node::<NodeToyName>()
        .node::<NodeToyColor>()
        .node::<NodeToyNotify>()
        .build()
        .expect("toy kinds are unique")
}

pub struct ToyFactory;

impl FlowFactory for ToyFactory {
    fn create(&self, _ctx: &Context, reference: &FlowReference) -> Result<Box<dyn Intent>, FlowError> {
        Ok(Box::new(IntentToyRoot {
            tag: reference.to_string(),
            ..Default::default()
        }))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IntentToyRoot {
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub ask_color: bool,
    #[serde(default)]
    pub endless: bool,
}

impl Kind for IntentToyRoot {
    const KIND: &'static str = "IntentToyRoot";
}

#[derive(Deserialize)]
struct NameInput {
    name: String,
}

#[derive(Deserialize)]
struct ColorInput {
    color: String,
}

struct Progress<'a> {
    name: bool,
    color: bool,
    notify: Option<&'a NodeToyNotify>,
}

fn progress<'a>(flows: Flows<'a>) -> Progress<'a> {
    let mut progress = Progress {
        name: false,
        color: false,
        notify: None,
    };
    for node in &flows.nearest.nodes {
        if let Some(simple) = node.as_simple() {
            progress.name |= downcast_node::<NodeToyName>(simple).is_some();
            progress.color |= downcast_node::<NodeToyColor>(simple).is_some();
            if let Some(notify) = downcast_node::<NodeToyNotify>(simple) {
                progress.notify = Some(notify);
            }
        }
    }
    progress
}

#[async_trait]
impl InputReactor for IntentToyRoot {
    async fn can_react_to(&self, _ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError> {
        if self.endless {
            return Ok(Reaction::Automatic);
        }
        let progress = progress(flows);
        Ok(match progress {
            Progress { name: false, .. } => Reaction::Input(InputSchema::new(
                JsonPointer::root(),
                json!({"type": "object", "required": ["name"], "properties": {"name": {"type": "string"}}}),
            )),
            Progress { color: false, .. } if self.ask_color => Reaction::Input(InputSchema::new(
                JsonPointer::root().push("color"),
                json!({"type": "object", "required": ["color"], "properties": {"color": {"type": "string"}}}),
            )),
            Progress { notify: None, .. } => Reaction::Automatic,
            Progress {
                notify: Some(notify),
                ..
            } if !notify.invoked => Reaction::PauseAndRetry,
            _ => Reaction::Eof,
        })
    }

    async fn react_to(
        &self,
        ctx: &Context,
        flows: Flows<'_>,
        input: Option<&Input>,
    ) -> Result<Outcome, FlowError> {
        if self.endless {
            return Ok(Outcome::simple(NodeToyName { name: "loop".into() }));
        }
        let progress = progress(flows);
        if !progress.name {
            let Some(NameInput { name }) = input.and_then(Input::decode::<NameInput>) else {
                return Ok(Outcome::Incompatible);
            };
            return Ok(match name.as_str() {
                "" => Outcome::Incompatible,
                "switch" => Outcome::SwitchFlow(SwitchFlow {
                    reference: FlowReference::new(FlowType::Signup, "default"),
                    synthetic_input: Input::synthetic(json!({"name": "switched"})),
                }),
                "rewrite" => Outcome::RewriteFlow(RewriteFlow {
                    intent: Box::new(IntentToyRoot {
                        tag: "rewritten".into(),
                        ..Default::default()
                    }),
                    nodes: Vec::new(),
                    synthetic_input: Input::synthetic(json!({"name": "rewritten"})),
                }),
                "captcha" => {
                    let switches = ctx.require::<Arc<ToySwitches>>()?;
                    Outcome::BotProtection(if switches.bot_unavailable.load(Ordering::SeqCst) {
                        BotProtectionVerification::ServiceUnavailable
                    } else {
                        BotProtectionVerification::Verified(Node::simple(NodeToyName { name }))
                    })
                }
                _ => Outcome::simple(NodeToyName { name }),
            });
        }
        if self.ask_color && !progress.color {
            let Some(ColorInput { color }) = input.and_then(Input::decode::<ColorInput>) else {
                return Ok(Outcome::Incompatible);
            };
            return Ok(match color.as_str() {
                "rename" => Outcome::Replace(Node::simple(NodeToyName {
                    name: "renamed".into(),
                })),
                "same" => Outcome::Same,
                _ => Outcome::simple(NodeToyColor { color }),
            });
        }
        if progress.notify.is_none() {
            return Ok(Outcome::simple(NodeToyNotify { invoked: false }));
        }
        Ok(Outcome::Incompatible)
    }
}

impl Intent for IntentToyRoot {}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeToyName {
    pub name: String,
}

impl Kind for NodeToyName {
    const KIND: &'static str = "NodeToyName";
}

impl NodeSimple for NodeToyName {
    fn effects(&self, _ctx: &Context, _flows: Flows<'_>) -> Result<Vec<Effect>, FlowError> {
        let name = self.name.clone();
        Ok(vec![
            Effect::run(|ctx| async move {
                let switches = ctx.require::<Arc<ToySwitches>>()?;
                if switches.fail_run.load(Ordering::SeqCst) {
                    return Err(FlowError::internal("run effect failed"));
                }
                switches.run_effects.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            Effect::on_commit(move |ctx| async move {
                ctx.require::<Arc<ToySwitches>>()?.committed.lock().push(name);
                Ok(())
            }),
        ])
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeToyColor {
    pub color: String,
}

impl Kind for NodeToyColor {
    const KIND: &'static str = "NodeToyColor";
}

impl NodeSimple for NodeToyColor {}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeToyNotify {
    pub invoked: bool,
}

impl Kind for NodeToyNotify {
    const KIND: &'static str = "NodeToyNotify";
}

impl NodeSimple for NodeToyNotify {
    fn delayed(&self) -> Option<&dyn DelayedOneTimeFunction> {
        Some(self)
    }

    fn delayed_mut(&mut self) -> Option<&mut dyn DelayedOneTimeFunction> {
        Some(self)
    }
}

#[async_trait]
impl DelayedOneTimeFunction for NodeToyNotify {
    fn invoked(&self) -> bool {
        self.invoked
    }

    fn set_invoked(&mut self, invoked: bool) {
        self.invoked = invoked;
    }

    async fn invoke(&self, ctx: &Context) -> Result<(), FlowError> {
        let switches = ctx.require::<Arc<ToySwitches>>()?;
        if switches.fail_notify.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("notification endpoint refused").into());
        }
        switches.notified.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

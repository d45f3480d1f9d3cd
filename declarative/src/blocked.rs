//! # Blocked authentication
//!
//! A submission refused because the user may not sign in (disabled account, a hook that
//! disallowed it) is reported as `authentication.blocked`. The step itself rolled back,
//! so the event goes out without a transaction and a failed dispatch only gets logged.

use crate::deps::DepsExt;
use crate::model::Event;
use async_trait::async_trait;
use authflow_core::context::Context;
use authflow_core::error::FlowError;
use authflow_core::flow::{Flow, Flows, RejectionHook};
use authflow_core::milestone::get_user_id;
use serde_json::json;
use tracing::{error, info};

const BLOCKING_REASONS: &[&str] = &["DisabledUser", "WebHookDisallowed"];

fn is_blocking(err: &FlowError) -> bool {
    err.reason().is_some_and(|reason| BLOCKING_REASONS.contains(&reason))
}

/// [`RejectionHook`] dispatching `authentication.blocked`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthenticationBlocked;

#[async_trait]
impl RejectionHook for AuthenticationBlocked {
    async fn rejected(&self, ctx: &Context, root: &Flow, err: &FlowError) {
        if !is_blocking(err) {
            return;
        }
        let user_id = get_user_id(Flows::new(root)).ok();
        let event = Event::new(
            Event::AUTHENTICATION_BLOCKED,
            json!({
                "user_id": user_id,
                "flow": ctx.flow_reference().to_string(),
                "error": err.api(),
            }),
        );
        let dispatched = match ctx.events() {
            Ok(events) => events.dispatch_event_without_tx(&event).await,
            Err(err) => Err(err),
        };
        match dispatched {
            Ok(()) => info!(user_id = ?user_id, reason = ?err.reason(), "authentication blocked"),
            Err(dispatch_err) => {
                error!(%dispatch_err, "failed to dispatch authentication.blocked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors;

    #[test]
    fn test_only_account_refusals_block() {
        assert!(is_blocking(&errors::disabled_user()));
        assert!(is_blocking(&errors::webhook_disallowed()));
        assert!(!is_blocking(&errors::invalid_credentials()));
        assert!(!is_blocking(&FlowError::IncompatibleInput));
    }
}

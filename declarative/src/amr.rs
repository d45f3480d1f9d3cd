//! # AMR constraint satisfaction
//!
//! * **required**: union of every [`ConstraintsProvider`] in the tree (the login flow's
//!   configured `required_amr` and the response of the pre-authenticated hook).
//! * **achieved**: union of the tokens of every [`DidAuthenticate`], plus `mfa` once two
//!   distinct authentication events happened. Two uses of one authenticator count once; a
//!   recovery code contributes nothing alone but completes `mfa` together with another factor.
//! * **remaining**: required minus achieved. Only candidates able to shrink it are offered.

use crate::milestones::{ConstraintsProvider, DidAuthenticate};
use crate::model::Authentication;
use authflow_core::flow::Flow;
use authflow_core::milestone::find_all_milestones;
use std::collections::BTreeSet;

pub const MFA: &str = "mfa";

pub fn required_amr(root: &Flow) -> BTreeSet<String> {
    find_all_milestones::<ConstraintsProvider>(root)
        .into_iter()
        .flat_map(|ConstraintsProvider(tokens)| tokens)
        .collect()
}

pub fn authentication_events(root: &Flow) -> Vec<DidAuthenticate> {
    find_all_milestones::<DidAuthenticate>(root)
}

fn factor_key(event: &DidAuthenticate) -> &str {
    event
        .authenticator_id
        .as_deref()
        .unwrap_or(event.authentication.as_str())
}

pub fn achieved_amr(events: &[DidAuthenticate]) -> BTreeSet<String> {
    let mut achieved: BTreeSet<String> = events
        .iter()
        .flat_map(|event| event.amr.iter().cloned())
        .collect();
    let factors: BTreeSet<&str> = events.iter().map(factor_key).collect();
    if factors.len() >= 2 {
        achieved.insert(MFA.to_string());
    }
    achieved
}

pub fn remaining_amr(required: &BTreeSet<String>, achieved: &BTreeSet<String>) -> BTreeSet<String> {
    required.difference(achieved).cloned().collect()
}

/// Whether completing `candidate` removes at least one token from `remaining`.
pub fn contributes(
    candidate: Authentication,
    remaining: &BTreeSet<String>,
    events: &[DidAuthenticate],
) -> bool {
    if candidate.amr().iter().any(|token| remaining.contains(*token)) {
        return true;
    }
    remaining.contains(MFA) && !events.iter().any(|event| event.authentication == candidate)
}

/// Required, achieved and remaining tokens of a whole tree.
pub fn evaluate(root: &Flow) -> (BTreeSet<String>, BTreeSet<String>, BTreeSet<String>) {
    let required = required_amr(root);
    let achieved = achieved_amr(&authentication_events(root));
    let remaining = remaining_amr(&required, &achieved);
    (required, achieved, remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(authentication: Authentication, authenticator_id: Option<&str>) -> DidAuthenticate {
        DidAuthenticate {
            authentication,
            authenticator_id: authenticator_id.map(str::to_string),
            amr: authentication.amr().iter().map(|t| t.to_string()).collect(),
            request_device_token: false,
        }
    }

    fn tokens(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_one_otp_leaves_mfa() {
        let required = tokens(&["mfa", "otp"]);
        let events = vec![event(Authentication::SecondaryTotp, Some("totp-1"))];
        let achieved = achieved_amr(&events);
        assert_eq!(achieved, tokens(&["otp"]));
        assert_eq!(remaining_amr(&required, &achieved), tokens(&["mfa"]));
    }

    #[test]
    fn test_recovery_code_completes_mfa_jointly() {
        let required = tokens(&["mfa", "otp"]);
        let events = vec![
            event(Authentication::SecondaryTotp, Some("totp-1")),
            event(Authentication::RecoveryCode, None),
        ];
        let achieved = achieved_amr(&events);
        assert!(remaining_amr(&required, &achieved).is_empty());

        let alone = achieved_amr(&[event(Authentication::RecoveryCode, None)]);
        assert!(alone.is_empty());
    }

    #[test]
    fn test_same_authenticator_counts_once() {
        let events = vec![
            event(Authentication::PrimaryPassword, Some("pw-1")),
            event(Authentication::PrimaryPassword, Some("pw-1")),
        ];
        assert_eq!(achieved_amr(&events), tokens(&["pwd"]));

        let events = vec![
            event(Authentication::PrimaryPassword, Some("pw-1")),
            event(Authentication::SecondaryOobOtpSms, Some("sms-1")),
        ];
        assert_eq!(achieved_amr(&events), tokens(&["mfa", "otp", "pwd", "sms"]));
    }

    #[test]
    fn test_candidate_contribution() {
        let events = vec![event(Authentication::PrimaryPassword, Some("pw-1"))];
        let remaining = tokens(&["mfa"]);
        assert!(contributes(Authentication::SecondaryTotp, &remaining, &events));
        assert!(contributes(Authentication::RecoveryCode, &remaining, &events));
        assert!(!contributes(Authentication::PrimaryPassword, &remaining, &events));

        let remaining = tokens(&["sms"]);
        assert!(contributes(Authentication::SecondaryOobOtpSms, &remaining, &events));
        assert!(!contributes(Authentication::SecondaryTotp, &remaining, &events));
        assert!(!contributes(Authentication::RecoveryCode, &remaining, &events));
    }
}

//! Offline summary of a persisted flow tree.

use anyhow::{Context, Result};
use authflow_core::document::FlowDocument;
use authflow_core::flow::{Flow, Flows, outline};
use authflow_core::intent::Tagged;
use authflow_core::milestone::get_user_id;
use authflow_core::{FlowError, Registry};
use authflow_declarative::amr;
use authflow_runtime::prelude::StoredFlow;
use serde_json::{Value, json};

/// Accepts either a full store record or a bare tree document.
pub fn run_inspect_command(path: &str, as_json: bool) -> Result<()> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read flow file: {}", path))?;
    let raw: Value = serde_json::from_str(&content).context("Failed to parse flow JSON")?;

    let registry = authflow_declarative::registry().context("Failed to build registry")?;
    let flow = decode(&registry, raw)?;
    let summary = summarize(&flow);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for line in outline(&flow) {
        println!("{line}");
    }
    println!();
    println!("user:     {}", summary["user_id"].as_str().unwrap_or("-"));
    println!("required: {}", join(&summary["required_amr"]));
    println!("achieved: {}", join(&summary["achieved_amr"]));
    println!("missing:  {}", join(&summary["remaining_amr"]));
    Ok(())
}

fn decode(registry: &Registry, raw: Value) -> Result<Flow> {
    let document: FlowDocument = if raw.get("document").is_some() {
        let stored: StoredFlow =
            serde_json::from_value(raw).context("Failed to decode stored flow record")?;
        tracing::info!(
            instance_id = %stored.instance_id,
            flow_reference = %stored.flow_reference,
            version = stored.version,
            "decoded stored flow"
        );
        stored.document
    } else {
        serde_json::from_value(raw).context("Failed to decode flow document")?
    };
    registry
        .decode_flow(&document)
        .context("Flow references kinds this registry cannot decode")
}

fn summarize(flow: &Flow) -> Value {
    let user_id = match get_user_id(Flows::new(flow)) {
        Ok(user_id) => Some(user_id),
        Err(FlowError::NoUserId) => None,
        Err(err) => Some(format!("<{err}>")),
    };
    let (required, achieved, remaining) = amr::evaluate(flow);
    json!({
        "root": flow.intent.kind(),
        "user_id": user_id,
        "required_amr": required,
        "achieved_amr": achieved,
        "remaining_amr": remaining,
    })
}

fn join(tokens: &Value) -> String {
    let items: Vec<&str> = tokens
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authflow_declarative::login::IntentLoginFlow;

    #[test]
    fn test_bare_document_summary() {
        let registry = authflow_declarative::registry().unwrap();
        let flow = Flow::new(IntentLoginFlow {
            required_amr: vec!["pwd".to_string()],
        });
        let raw = serde_json::to_value(flow.to_document().unwrap()).unwrap();

        let decoded = decode(&registry, raw).unwrap();
        let summary = summarize(&decoded);
        assert_eq!(summary["root"], "IntentLoginFlow");
        assert_eq!(summary["user_id"], Value::Null);
        assert_eq!(summary["required_amr"], json!(["pwd"]));
        assert_eq!(summary["remaining_amr"], json!(["pwd"]));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let registry = authflow_declarative::registry().unwrap();
        let raw = json!({"intent": {"kind": "IntentMystery", "data": {}}, "nodes": []});
        assert!(decode(&registry, raw).is_err());
    }
}

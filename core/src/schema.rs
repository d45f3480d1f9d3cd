//! Validation of client input against the JSON Schema subset used by step schemas.
//!
//! Supported keywords: `type`, `properties`, `required`, `additionalProperties`, `items`,
//! `minItems`, `const`, `enum`, `minLength`, `maxLength`, `minimum`, `maximum`, `format`,
//! `allOf`, `anyOf`, `oneOf`, `if`/`then`/`else` and local `$ref`. Unknown keywords are ignored.
//!
//! Domain formats: `x_base64_url`, `json-pointer`, `uri`, `email`.

use crate::error::ValidationError;
use crate::jsonpointer::JsonPointer;
use serde_json::{Map, Value};

pub fn validate(document: &Value, instance: &Value) -> Result<(), ValidationError> {
    let mut errors = ValidationError::default();
    Validator { root: document }.check(document, instance, "", &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

struct Validator<'a> {
    root: &'a Value,
}

impl Validator<'_> {
    fn passes(&self, schema: &Value, instance: &Value, location: &str) -> bool {
        let mut scratch = ValidationError::default();
        self.check(schema, instance, location, &mut scratch);
        scratch.is_empty()
    }

    fn resolve(&self, reference: &str) -> Option<&Value> {
        let pointer: JsonPointer = reference.strip_prefix('#')?.parse().ok()?;
        pointer.traverse(self.root)
    }

    fn check(&self, schema: &Value, instance: &Value, location: &str, errors: &mut ValidationError) {
        let schema = match schema {
            Value::Bool(true) => return,
            Value::Bool(false) => {
                errors.push(location, "false", "no value is allowed");
                return;
            }
            Value::Object(map) => map,
            _ => return,
        };

        if let Some(Value::String(reference)) = schema.get("$ref") {
            match self.resolve(reference) {
                Some(target) => self.check(target, instance, location, errors),
                None => errors.push(location, "$ref", format!("unresolved reference {reference}")),
            }
        }

        if let Some(expected) = schema.get("type") {
            if !type_matches(expected, instance) {
                errors.push(location, "type", format!("expected {expected}"));
                return;
            }
        }

        if let Some(constant) = schema.get("const") {
            if constant != instance {
                errors.push(location, "const", format!("expected {constant}"));
            }
        }

        if let Some(Value::Array(allowed)) = schema.get("enum") {
            if !allowed.contains(instance) {
                errors.push(location, "enum", "value is not allowed");
            }
        }

        match instance {
            Value::String(s) => self.check_string(schema, s, location, errors),
            Value::Number(n) => {
                let value = n.as_f64().unwrap_or_default();
                if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
                    if value < min {
                        errors.push(location, "minimum", format!("must be >= {min}"));
                    }
                }
                if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
                    if value > max {
                        errors.push(location, "maximum", format!("must be <= {max}"));
                    }
                }
            }
            Value::Object(object) => self.check_object(schema, object, location, errors),
            Value::Array(items) => {
                if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
                    if (items.len() as u64) < min {
                        errors.push(location, "minItems", format!("needs at least {min} items"));
                    }
                }
                if let Some(item_schema) = schema.get("items") {
                    for (idx, item) in items.iter().enumerate() {
                        self.check(item_schema, item, &format!("{location}/{idx}"), errors);
                    }
                }
            }
            _ => {}
        }

        if let Some(Value::Array(all)) = schema.get("allOf") {
            for sub in all {
                self.check(sub, instance, location, errors);
            }
        }

        if let Some(Value::Array(any)) = schema.get("anyOf") {
            if !any.iter().any(|sub| self.passes(sub, instance, location)) {
                errors.push(location, "anyOf", "no branch matched");
            }
        }

        if let Some(Value::Array(one)) = schema.get("oneOf") {
            let matched = one
                .iter()
                .filter(|sub| self.passes(sub, instance, location))
                .count();
            if matched != 1 {
                errors.push(
                    location,
                    "oneOf",
                    format!("exactly one branch must match, {matched} matched"),
                );
            }
        }

        if let Some(condition) = schema.get("if") {
            let branch = if self.passes(condition, instance, location) {
                schema.get("then")
            } else {
                schema.get("else")
            };
            if let Some(branch) = branch {
                self.check(branch, instance, location, errors);
            }
        }
    }

    fn check_string(
        &self,
        schema: &Map<String, Value>,
        value: &str,
        location: &str,
        errors: &mut ValidationError,
    ) {
        let len = value.chars().count() as u64;
        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if len < min {
                errors.push(location, "minLength", format!("must be at least {min} characters"));
            }
        }
        if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
            if len > max {
                errors.push(location, "maxLength", format!("must be at most {max} characters"));
            }
        }
        if let Some(format) = schema.get("format").and_then(Value::as_str) {
            if !format_matches(format, value) {
                errors.push(location, "format", format!("not a valid {format}"));
            }
        }
    }

    fn check_object(
        &self,
        schema: &Map<String, Value>,
        object: &Map<String, Value>,
        location: &str,
        errors: &mut ValidationError,
    ) {
        if let Some(Value::Array(required)) = schema.get("required") {
            for name in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(name) {
                    errors.push(location, "required", format!("missing property: {name}"));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);
        for (name, value) in object {
            let child = format!("{location}/{name}");
            match properties.and_then(|props| props.get(name)) {
                Some(property_schema) => self.check(property_schema, value, &child, errors),
                None => {
                    if let Some(additional) = schema.get("additionalProperties") {
                        self.check(additional, value, &child, errors);
                    }
                }
            }
        }
    }
}

fn type_matches(expected: &Value, instance: &Value) -> bool {
    match expected {
        Value::String(name) => single_type_matches(name, instance),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| single_type_matches(name, instance)),
        _ => true,
    }
}

fn single_type_matches(name: &str, instance: &Value) -> bool {
    match name {
        "object" => instance.is_object(),
        "array" => instance.is_array(),
        "string" => instance.is_string(),
        "boolean" => instance.is_boolean(),
        "null" => instance.is_null(),
        "number" => instance.is_number(),
        "integer" => {
            instance.is_i64()
                || instance.is_u64()
                || instance.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        _ => true,
    }
}

fn format_matches(format: &str, value: &str) -> bool {
    match format {
        "x_base64_url" => value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
        "json-pointer" => value.parse::<JsonPointer>().is_ok(),
        "uri" => match value.split_once(':') {
            Some((scheme, rest)) => {
                !rest.is_empty()
                    && scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
                    && scheme
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
            }
            None => false,
        },
        "email" => match value.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.is_empty()
                    && !domain.contains('@')
                    && !value.contains(char::is_whitespace)
            }
            None => false,
        },
        _ => true,
    }
}

//! RK-008: Intrinsic function helpers and reference extraction.

use serde_json::{json, Value};
use std::collections::BTreeSet;

pub const ACCOUNT_ID: &str = "AWS::AccountId";
pub const REGION: &str = "AWS::Region";
pub const PARTITION: &str = "AWS::Partition";

pub fn ref_(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

pub fn import_value(export_name: &str) -> Value {
    json!({ "Fn::ImportValue": export_name })
}

pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

pub fn select(index: usize, list: Value) -> Value {
    json!({ "Fn::Select": [index, list] })
}

/// AZs of the stack's region.
pub fn get_azs() -> Value {
    json!({ "Fn::GetAZs": "" })
}

pub fn base64(value: Value) -> Value {
    json!({ "Fn::Base64": value })
}

pub fn sub(template: &str) -> Value {
    json!({ "Fn::Sub": template })
}

/// `arn:${AWS::Partition}:iam::aws:policy/<name>`
pub fn managed_policy_arn(name: &str) -> Value {
    join(
        "",
        vec![
            json!("arn:"),
            ref_(PARTITION),
            json!(format!(":iam::aws:policy/{}", name)),
        ],
    )
}

/// Is this a pseudo parameter rather than a declared resource?
pub fn is_pseudo(name: &str) -> bool {
    name.starts_with("AWS::")
}

/// Collect every logical id a value points at through `Ref` or `Fn::GetAtt`.
///
/// Pseudo parameters are skipped. `Fn::Sub` strings are scanned for `${Id}`
/// and `${Id.Attr}` placeholders.
pub fn references(value: &Value) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect(value, &mut out);
    out
}

fn collect(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(id)) = map.get("Ref") {
                if !is_pseudo(id) {
                    out.insert(id.clone());
                }
            }
            if let Some(Value::Array(parts)) = map.get("Fn::GetAtt") {
                if let Some(Value::String(id)) = parts.first() {
                    out.insert(id.clone());
                }
            }
            if let Some(Value::String(s)) = map.get("Fn::Sub") {
                collect_sub(s, out);
            }
            for v in map.values() {
                collect(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect(v, out);
            }
        }
        _ => {}
    }
}

fn collect_sub(template: &str, out: &mut BTreeSet<String>) {
    let mut rest = template;
    while let Some(open) = rest.find("${") {
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            break;
        };
        let key = &after[..close];
        // `${!Literal}` escapes substitution
        if !key.starts_with('!') {
            let id = key.split('.').next().unwrap_or(key);
            if !id.is_empty() && !is_pseudo(id) {
                out.insert(id.to_string());
            }
        }
        rest = &after[close + 1..];
    }
}

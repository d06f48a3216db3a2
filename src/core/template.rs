//! RK-001: CloudFormation template model.
//!
//! Order-preserving maps keep the rendered JSON stable across runs, so the
//! same declarations always synthesize to the same bytes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Template format version emitted for every stack.
pub const FORMAT_VERSION: &str = "2010-09-09";

/// A single stack's template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, Parameter>,

    #[serde(default)]
    pub resources: IndexMap<String, Resource>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, Output>,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description: None,
            parameters: IndexMap::new(),
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }
}

impl Template {
    /// Resources of one provider type, in declaration order.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
    }

    pub fn count_of_type(&self, resource_type: &str) -> usize {
        self.resources_of_type(resource_type).count()
    }
}

/// A declared provider resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub properties: Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<RemovalPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<RemovalPolicy>,
}

impl Resource {
    pub fn new(resource_type: &str, properties: Value) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            properties,
            depends_on: Vec::new(),
            update_replace_policy: None,
            deletion_policy: None,
        }
    }

    /// Add an explicit ordering edge to another resource of the same stack.
    pub fn depends_on(mut self, logical_id: &str) -> Self {
        if !self.depends_on.iter().any(|d| d == logical_id) {
            self.depends_on.push(logical_id.to_string());
        }
        self
    }

    /// Set both the deletion and update-replace policy.
    pub fn removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.update_replace_policy = Some(policy);
        self.deletion_policy = Some(policy);
        self
    }

    /// Look up a property by JSON pointer relative to `Properties`.
    pub fn prop(&self, pointer: &str) -> Option<&Value> {
        self.properties.pointer(pointer)
    }
}

/// What happens to a resource when it leaves the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalPolicy {
    Delete,
    Retain,
    Snapshot,
}

/// A template parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub parameter_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A stack output, optionally exported for other stacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub value: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<Export>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Export {
    pub name: String,
}

/// Opaque handle to a resource declared in some stack.
///
/// Passing a `ResourceRef` between stages transfers no ownership; the
/// consumer turns it into a value through [`crate::core::app::App::reference`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub stack: String,
    pub logical_id: String,
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stack, self.logical_id)
    }
}

/// Which value of a resource a reference reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Attr {
    /// The resource's primary identifier (`Ref`).
    Ref,
    /// A named attribute (`Fn::GetAtt`).
    Att(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rk001_template_serializes_pascal_case() {
        let mut t = Template::default();
        t.resources.insert(
            "Bucket".to_string(),
            Resource::new("AWS::S3::Bucket", json!({})).removal_policy(RemovalPolicy::Retain),
        );
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(v["Resources"]["Bucket"]["Type"], "AWS::S3::Bucket");
        assert_eq!(v["Resources"]["Bucket"]["DeletionPolicy"], "Retain");
        assert!(v.get("Outputs").is_none());
        assert!(v.get("Parameters").is_none());
    }

    #[test]
    fn test_rk001_depends_on_dedup() {
        let r = Resource::new("AWS::EC2::Route", Value::Null)
            .depends_on("Gw")
            .depends_on("Gw");
        assert_eq!(r.depends_on, vec!["Gw"]);
        let v = serde_json::to_value(&r).unwrap();
        assert!(v.get("Properties").is_none());
        assert_eq!(v["DependsOn"], json!(["Gw"]));
    }

    #[test]
    fn test_rk001_count_of_type() {
        let mut t = Template::default();
        for id in ["A", "B"] {
            t.resources
                .insert(id.to_string(), Resource::new("AWS::EC2::Subnet", json!({})));
        }
        t.resources
            .insert("C".to_string(), Resource::new("AWS::EC2::VPC", json!({})));
        assert_eq!(t.count_of_type("AWS::EC2::Subnet"), 2);
        assert_eq!(t.count_of_type("AWS::EC2::NatGateway"), 0);
    }

    #[test]
    fn test_rk001_prop_pointer() {
        let r = Resource::new(
            "AWS::ElasticLoadBalancingV2::Listener",
            json!({"Port": 80, "DefaultActions": [{"Type": "forward"}]}),
        );
        assert_eq!(r.prop("/Port"), Some(&json!(80)));
        assert_eq!(r.prop("/DefaultActions/0/Type"), Some(&json!("forward")));
        assert!(r.prop("/Missing").is_none());
    }

    #[test]
    fn test_rk001_template_roundtrip() {
        let mut t = Template {
            description: Some("net".to_string()),
            ..Template::default()
        };
        t.outputs.insert(
            "VpcIdOutput".to_string(),
            Output {
                value: json!({"Ref": "Vpc"}),
                description: None,
                export: Some(Export {
                    name: "VpcId".to_string(),
                }),
            },
        );
        let s = serde_json::to_string(&t).unwrap();
        let back: Template = serde_json::from_str(&s).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_rk001_resource_ref_display() {
        let r = ResourceRef {
            stack: "VpcStack".to_string(),
            logical_id: "Vpc".to_string(),
        };
        assert_eq!(r.to_string(), "VpcStack/Vpc");
    }
}

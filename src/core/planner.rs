//! RK-007: Diff generation. Compares a fresh assembly with the templates
//! previously written to the output directory.

use super::assembly::{self, CloudAssembly};
use super::error::Result;
use super::hasher;
use super::resolver;
use super::template::{Resource, Template};
use super::types::*;
use std::path::Path;

/// Pseudo resource type reported for stack outputs.
pub const OUTPUT_TYPE: &str = "Output";

/// Build a plan against the assembly stored in `out_dir`.
pub fn plan(assembly: &CloudAssembly, out_dir: &Path) -> Result<DiffPlan> {
    let mut previous = Vec::new();
    for stack in &assembly.stacks {
        previous.push((
            stack.name.clone(),
            assembly::load_template(out_dir, &stack.name)?,
        ));
    }
    // Stacks that existed before but are gone now
    if let Some(manifest) = assembly::load_manifest(out_dir)? {
        for name in manifest.artifacts.keys() {
            if assembly.stack(name).is_none() {
                previous.push((name.clone(), assembly::load_template(out_dir, name)?));
            }
        }
    }

    let mut diff = DiffPlan::default();
    for (name, old) in previous {
        let new = assembly.stack(&name).map(|s| &s.template);
        diff_stack(&mut diff, &name, old.as_ref(), new)?;
    }
    Ok(diff)
}

/// Append the changes for one stack to `diff`.
pub fn diff_stack(
    diff: &mut DiffPlan,
    stack: &str,
    old: Option<&Template>,
    new: Option<&Template>,
) -> Result<()> {
    if let Some(new) = new {
        for logical_id in resolver::creation_order(new)? {
            let resource = &new.resources[&logical_id];
            let action = match old.and_then(|o| o.resources.get(&logical_id)) {
                None => PlanAction::Create,
                Some(prev) => {
                    if hash_resource(prev)? == hash_resource(resource)? {
                        PlanAction::NoOp
                    } else {
                        PlanAction::Update
                    }
                }
            };
            push(diff, stack, &logical_id, &resource.resource_type, action);
        }
    }

    if let Some(old) = old {
        // Teardown runs in reverse creation order
        let mut gone: Vec<String> = resolver::creation_order(old)?
            .into_iter()
            .filter(|id| new.is_none_or(|n| !n.resources.contains_key(id)))
            .collect();
        gone.reverse();
        for logical_id in gone {
            let resource = &old.resources[&logical_id];
            push(diff, stack, &logical_id, &resource.resource_type, PlanAction::Destroy);
        }
    }

    diff_outputs(diff, stack, old, new);
    Ok(())
}

/// Outputs only appear in the plan when they change.
fn diff_outputs(diff: &mut DiffPlan, stack: &str, old: Option<&Template>, new: Option<&Template>) {
    if let Some(new) = new {
        for (name, output) in &new.outputs {
            match old.and_then(|o| o.outputs.get(name)) {
                None => push(diff, stack, name, OUTPUT_TYPE, PlanAction::Create),
                Some(prev) if prev != output => {
                    push(diff, stack, name, OUTPUT_TYPE, PlanAction::Update)
                }
                Some(_) => {}
            }
        }
    }
    if let Some(old) = old {
        for name in old.outputs.keys() {
            if new.is_none_or(|n| !n.outputs.contains_key(name)) {
                push(diff, stack, name, OUTPUT_TYPE, PlanAction::Destroy);
            }
        }
    }
}

fn push(diff: &mut DiffPlan, stack: &str, logical_id: &str, resource_type: &str, action: PlanAction) {
    match action {
        PlanAction::Create => diff.to_create += 1,
        PlanAction::Update => diff.to_update += 1,
        PlanAction::Destroy => diff.to_destroy += 1,
        PlanAction::NoOp => diff.unchanged += 1,
    }
    diff.changes.push(PlannedChange {
        stack: stack.to_string(),
        logical_id: logical_id.to_string(),
        resource_type: resource_type.to_string(),
        action,
    });
}

/// Hash of a resource's full declaration.
pub fn hash_resource(resource: &Resource) -> Result<String> {
    Ok(hasher::hash_string(&serde_json::to_string(resource)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assembly::SynthesizedStack;
    use serde_json::json;

    fn template(resources: &[(&str, serde_json::Value)]) -> Template {
        let mut t = Template::default();
        for (id, props) in resources {
            t.resources.insert(
                id.to_string(),
                Resource::new("AWS::EC2::SecurityGroup", props.clone()),
            );
        }
        t
    }

    fn synthesized(name: &str, template: Template) -> SynthesizedStack {
        let body = serde_json::to_string_pretty(&template).unwrap();
        SynthesizedStack {
            name: name.to_string(),
            environment: Environment::default(),
            dependencies: vec![],
            hash: hasher::hash_string(&body),
            template,
            body,
            assets: vec![],
        }
    }

    #[test]
    fn test_rk007_all_create_without_previous() {
        let dir = tempfile::tempdir().unwrap();
        let assembly = CloudAssembly {
            stacks: vec![synthesized(
                "S",
                template(&[("A", json!({})), ("B", json!({}))]),
            )],
        };
        let diff = plan(&assembly, dir.path()).unwrap();
        assert_eq!(diff.to_create, 2);
        assert!(diff.changes.iter().all(|c| c.action == PlanAction::Create));
    }

    #[test]
    fn test_rk007_unchanged_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let assembly = CloudAssembly {
            stacks: vec![synthesized("S", template(&[("A", json!({"GroupDescription": "x"}))]))],
        };
        assembly.write(dir.path()).unwrap();
        let diff = plan(&assembly, dir.path()).unwrap();
        assert_eq!(diff.unchanged, 1);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_rk007_update_and_destroy() {
        let old = template(&[
            ("Keep", json!({"GroupDescription": "same"})),
            ("Change", json!({"GroupDescription": "before"})),
            ("Drop", json!({})),
        ]);
        let new = template(&[
            ("Keep", json!({"GroupDescription": "same"})),
            ("Change", json!({"GroupDescription": "after"})),
            ("Add", json!({})),
        ]);
        let mut diff = DiffPlan::default();
        diff_stack(&mut diff, "S", Some(&old), Some(&new)).unwrap();
        assert_eq!(diff.to_create, 1);
        assert_eq!(diff.to_update, 1);
        assert_eq!(diff.to_destroy, 1);
        assert_eq!(diff.unchanged, 1);
        let destroyed = diff
            .changes
            .iter()
            .find(|c| c.action == PlanAction::Destroy)
            .unwrap();
        assert_eq!(destroyed.logical_id, "Drop");
    }

    #[test]
    fn test_rk007_removed_stack_destroys_everything() {
        let dir = tempfile::tempdir().unwrap();
        CloudAssembly {
            stacks: vec![
                synthesized("Gone", template(&[("A", json!({})), ("B", json!({}))])),
                synthesized("Stay", template(&[("C", json!({}))])),
            ],
        }
        .write(dir.path())
        .unwrap();

        let now = CloudAssembly {
            stacks: vec![synthesized("Stay", template(&[("C", json!({}))]))],
        };
        let diff = plan(&now, dir.path()).unwrap();
        assert_eq!(diff.to_destroy, 2);
        assert_eq!(diff.unchanged, 1);
        assert!(diff
            .changes
            .iter()
            .filter(|c| c.action == PlanAction::Destroy)
            .all(|c| c.stack == "Gone"));
    }

    #[test]
    fn test_rk007_destroy_in_reverse_creation_order() {
        let old = {
            let mut t = Template::default();
            t.resources
                .insert("Vpc".to_string(), Resource::new("AWS::EC2::VPC", json!({})));
            t.resources.insert(
                "Subnet".to_string(),
                Resource::new("AWS::EC2::Subnet", json!({"VpcId": {"Ref": "Vpc"}})),
            );
            t
        };
        let mut diff = DiffPlan::default();
        diff_stack(&mut diff, "S", Some(&old), None).unwrap();
        let ids: Vec<_> = diff.changes.iter().map(|c| c.logical_id.as_str()).collect();
        assert_eq!(ids, vec!["Subnet", "Vpc"]);
    }

    #[test]
    fn test_rk007_renamed_export_is_an_update() {
        use crate::core::template::{Export, Output};
        let with_export = |name: &str| {
            let mut t = template(&[("Vpc", json!({}))]);
            t.outputs.insert(
                "VpcIdOutput".to_string(),
                Output {
                    value: json!({"Ref": "Vpc"}),
                    description: None,
                    export: Some(Export {
                        name: name.to_string(),
                    }),
                },
            );
            t
        };
        let mut diff = DiffPlan::default();
        diff_stack(&mut diff, "S", Some(&with_export("VpcId")), Some(&with_export("SharedVpcId")))
            .unwrap();
        assert!(!diff.is_empty());
        assert_eq!(diff.to_update, 1);
        let change = diff
            .changes
            .iter()
            .find(|c| c.action == PlanAction::Update)
            .unwrap();
        assert_eq!(change.logical_id, "VpcIdOutput");
        assert_eq!(change.resource_type, OUTPUT_TYPE);

        let mut same = DiffPlan::default();
        diff_stack(&mut same, "S", Some(&with_export("VpcId")), Some(&with_export("VpcId")))
            .unwrap();
        assert!(same.is_empty());
        assert_eq!(same.changes.len(), 1);
    }

    #[test]
    fn test_rk007_hash_resource_deterministic() {
        let r = Resource::new("AWS::ECS::Cluster", json!({"ClusterName": "websocket-service"}));
        assert_eq!(hash_resource(&r).unwrap(), hash_resource(&r).unwrap());
    }
}

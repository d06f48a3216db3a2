//! RK-003: The synthesis root: stack registry and cross-stack wiring.
//!
//! Lifecycle: create an [`App`], let each stage register its stack and
//! resources, then call [`App::synth`] once. `synth` consumes the app.

use super::assembly::{CloudAssembly, ImageAsset, SynthesizedStack};
use super::error::{Error, Result};
use super::hasher;
use super::intrinsic;
use super::parser;
use super::resolver;
use super::template::{Attr, Export, Output, Parameter, Resource, ResourceRef, Template};
use super::types::{EnvConfig, Environment};
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static LOGICAL_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{1,255}$").expect("static regex"));

/// One deployable unit under construction.
#[derive(Debug, Clone)]
pub struct Stack {
    name: String,
    template: Template,
    dependencies: Vec<String>,
    assets: Vec<ImageAsset>,
}

impl Stack {
    fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            template: Template {
                description: Some(description.to_string()),
                ..Template::default()
            },
            dependencies: Vec::new(),
            assets: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Stacks this stack imports values from.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn assets(&self) -> &[ImageAsset] {
        &self.assets
    }

    /// Declare a resource. Logical ids are unique per stack.
    pub fn add_resource(&mut self, logical_id: &str, resource: Resource) -> Result<ResourceRef> {
        self.check_id(logical_id)?;
        if self.template.resources.contains_key(logical_id) {
            return Err(Error::DuplicateLogicalId {
                stack: self.name.clone(),
                logical_id: logical_id.to_string(),
            });
        }
        tracing::debug!(
            stack = %self.name,
            logical_id,
            resource_type = %resource.resource_type,
            "declared resource"
        );
        self.template
            .resources
            .insert(logical_id.to_string(), resource);
        Ok(ResourceRef {
            stack: self.name.clone(),
            logical_id: logical_id.to_string(),
        })
    }

    pub fn add_parameter(&mut self, logical_id: &str, parameter: Parameter) -> Result<()> {
        self.check_id(logical_id)?;
        if self.template.parameters.contains_key(logical_id)
            || self.template.resources.contains_key(logical_id)
        {
            return Err(Error::DuplicateLogicalId {
                stack: self.name.clone(),
                logical_id: logical_id.to_string(),
            });
        }
        self.template
            .parameters
            .insert(logical_id.to_string(), parameter);
        Ok(())
    }

    pub fn add_output(&mut self, logical_id: &str, output: Output) -> Result<()> {
        self.check_id(logical_id)?;
        if self.template.outputs.contains_key(logical_id) {
            return Err(Error::DuplicateLogicalId {
                stack: self.name.clone(),
                logical_id: logical_id.to_string(),
            });
        }
        if let Some(export) = &output.export {
            let taken = self
                .template
                .outputs
                .values()
                .filter_map(|o| o.export.as_ref())
                .any(|e| e.name == export.name);
            if taken {
                return Err(Error::InvalidName {
                    kind: "duplicate export name",
                    name: export.name.clone(),
                });
            }
        }
        self.template.outputs.insert(logical_id.to_string(), output);
        Ok(())
    }

    pub fn add_image_asset(&mut self, asset: ImageAsset) {
        if !self.assets.iter().any(|a| a.id == asset.id) {
            self.assets.push(asset);
        }
    }

    /// Local value of one of this stack's resources.
    pub fn value_of(&self, target: &ResourceRef, attr: &Attr) -> Result<Value> {
        if target.stack != self.name || !self.template.resources.contains_key(&target.logical_id)
        {
            return Err(Error::UnknownResource {
                stack: self.name.clone(),
                logical_id: target.logical_id.clone(),
            });
        }
        Ok(match attr {
            Attr::Ref => intrinsic::ref_(&target.logical_id),
            Attr::Att(name) => intrinsic::get_att(&target.logical_id, name),
        })
    }

    fn check_id(&self, logical_id: &str) -> Result<()> {
        if LOGICAL_ID.is_match(logical_id) {
            Ok(())
        } else {
            Err(Error::InvalidName {
                kind: "logical id",
                name: logical_id.to_string(),
            })
        }
    }
}

/// The synthesis root. Passed explicitly to every stage.
#[derive(Debug, Default)]
pub struct App {
    environment: Environment,
    stacks: IndexMap<String, Stack>,
}

impl App {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            stacks: IndexMap::new(),
        }
    }

    /// Resolve the environment from config, then `CDK_DEFAULT_*` variables.
    pub fn from_env(config: &EnvConfig) -> Self {
        let environment = parser::resolve_environment(config, |var| std::env::var(var).ok());
        if environment.is_agnostic() {
            tracing::warn!(
                target_env = %environment,
                "account or region unresolved; stacks will be environment-agnostic"
            );
        }
        Self::new(environment)
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Register a new stack. Each name may be registered once.
    pub fn add_stack(&mut self, name: &str, description: &str) -> Result<&mut Stack> {
        if !parser::STACK_NAME.is_match(name) {
            return Err(Error::InvalidName {
                kind: "stack name",
                name: name.to_string(),
            });
        }
        if self.stacks.contains_key(name) {
            return Err(Error::DuplicateStack(name.to_string()));
        }
        tracing::info!(stack = name, "registered stack");
        Ok(self
            .stacks
            .entry(name.to_string())
            .or_insert_with(|| Stack::new(name, description)))
    }

    pub fn stack(&self, name: &str) -> Result<&Stack> {
        self.stacks
            .get(name)
            .ok_or_else(|| Error::UnknownStack(name.to_string()))
    }

    pub fn stack_mut(&mut self, name: &str) -> Result<&mut Stack> {
        self.stacks
            .get_mut(name)
            .ok_or_else(|| Error::UnknownStack(name.to_string()))
    }

    pub fn stacks(&self) -> impl Iterator<Item = &Stack> {
        self.stacks.values()
    }

    /// Turn a handle into a value usable inside `consumer`'s template.
    ///
    /// Same-stack handles become `Ref`/`Fn::GetAtt`. Handles into another
    /// stack get an export on the producer and an `Fn::ImportValue` on the
    /// consumer, and record the producer as a dependency of the consumer.
    /// The producer must already be registered in this app.
    pub fn reference(&mut self, consumer: &str, target: &ResourceRef, attr: Attr) -> Result<Value> {
        if !self.stacks.contains_key(consumer) {
            return Err(Error::UnknownStack(consumer.to_string()));
        }
        if target.stack == consumer {
            return self.stack(consumer)?.value_of(target, &attr);
        }

        let producer = self
            .stacks
            .get(&target.stack)
            .ok_or_else(|| Error::missing(consumer, &format!("stack '{}'", target.stack)))?;
        let local = producer.value_of(target, &attr)?;

        if self.depends_on(&target.stack, consumer) {
            return Err(Error::DependencyCycle(format!(
                "{} -> {} -> {}",
                consumer, target.stack, consumer
            )));
        }

        let (output_id, export_name) = export_names(target, &attr);
        let producer = self.stack_mut(&target.stack)?;
        if !producer.template.outputs.contains_key(&output_id) {
            producer.add_output(
                &output_id,
                Output {
                    value: local,
                    description: None,
                    export: Some(Export {
                        name: export_name.clone(),
                    }),
                },
            )?;
        }

        let consumer_stack = self.stack_mut(consumer)?;
        if !consumer_stack.dependencies.iter().any(|d| d == &target.stack) {
            consumer_stack.dependencies.push(target.stack.clone());
        }
        Ok(intrinsic::import_value(&export_name))
    }

    /// Does `from` depend on `to`, directly or transitively?
    fn depends_on(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from];
        let mut seen = std::collections::HashSet::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(s) = self.stacks.get(current) {
                stack.extend(s.dependencies.iter().map(|d| d.as_str()));
            }
        }
        false
    }

    /// Validate, order and render every stack. Consumes the app.
    pub fn synth(self) -> Result<CloudAssembly> {
        let graph: IndexMap<String, Vec<String>> = self
            .stacks
            .iter()
            .map(|(name, s)| (name.clone(), s.dependencies.clone()))
            .collect();
        let order = resolver::stack_order(&graph)?;

        let mut stacks = self.stacks;
        let mut synthesized = Vec::with_capacity(order.len());
        for name in order {
            let Some(stack) = stacks.shift_remove(&name) else {
                return Err(Error::UnknownStack(name));
            };
            resolver::validate_template(&name, &stack.template)?;
            let body = serde_json::to_string_pretty(&stack.template)?;
            let hash = hasher::hash_string(&body);
            tracing::info!(
                stack = %name,
                resources = stack.template.resources.len(),
                %hash,
                "synthesized stack"
            );
            synthesized.push(SynthesizedStack {
                name,
                environment: self.environment.clone(),
                dependencies: stack.dependencies,
                template: stack.template,
                body,
                hash,
                assets: stack.assets,
            });
        }
        Ok(CloudAssembly {
            stacks: synthesized,
        })
    }
}

/// Output id and export name for an automatic cross-stack export.
fn export_names(target: &ResourceRef, attr: &Attr) -> (String, String) {
    let suffix = match attr {
        Attr::Ref => format!("Ref{}", target.logical_id),
        Attr::Att(name) => format!(
            "FnGetAtt{}{}",
            target.logical_id,
            name.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
        ),
    };
    let output_id = format!("ExportsOutput{}", suffix);
    let export_name = format!("{}:{}", target.stack, output_id);
    (output_id, export_name)
}

//! RK-002: YAML parsing and validation of `rafiki.yaml`.
//!
//! Validation collects every problem instead of stopping at the first one:
//! - Version must be "1.0"
//! - Stack names must be valid and distinct
//! - Subnet tiers must fit inside the VPC block
//! - Capacity ranges, CPU targets, ports and header names must be sane

use super::types::*;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use crate::core::error::{Error, Result};

pub const ACCOUNT_ENV: &str = "CDK_DEFAULT_ACCOUNT";
pub const REGION_ENV: &str = "CDK_DEFAULT_REGION";

pub(crate) static STACK_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,127}$").expect("static regex"));
static INSTANCE_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]*\.[a-z0-9]+$").expect("static regex"));
static HEADER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]{1,256}$").expect("static regex"));
static EXPORT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9:-]{1,255}$").expect("static regex"));

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a rafiki.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::io(format!("failed to read {}", path.display()), e))?;
    parse_config(&content)
}

/// Parse a rafiki.yaml from a string. Blank input yields the defaults.
pub fn parse_config(yaml: &str) -> Result<AppConfig> {
    if yaml.trim().is_empty() {
        return Ok(AppConfig::default());
    }
    Ok(serde_yaml_ng::from_str(yaml)?)
}

/// Load the config at `path`, or the defaults when no path is given.
/// Fails when the config does not validate.
pub fn load(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => parse_config_file(p)?,
        None => {
            tracing::debug!("no config file given, using defaults");
            AppConfig::default()
        }
    };
    let errors = validate_config(&config);
    if errors.is_empty() {
        Ok(config)
    } else {
        Err(Error::Validation(
            errors.into_iter().map(|e| e.message).collect(),
        ))
    }
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &AppConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if config.version != "1.0" {
        push(format!("version must be \"1.0\", got \"{}\"", config.version));
    }
    if config.name.is_empty() {
        push("name must not be empty".to_string());
    }

    // Stack names
    let mut seen = HashSet::new();
    for name in [
        &config.network.stack_name,
        &config.compute.stack_name,
        &config.edge.stack_name,
    ] {
        if !STACK_NAME.is_match(name) {
            push(format!("invalid stack name '{}'", name));
        }
        if !seen.insert(name.as_str()) {
            push(format!("stack name '{}' is used more than once", name));
        }
    }

    validate_network(&config.network, &mut push);
    validate_compute(&config.compute, &mut push);
    validate_edge(&config.edge, &mut push);

    errors
}

fn validate_network(net: &NetworkConfig, push: &mut impl FnMut(String)) {
    if net.cidr.trunc() != net.cidr {
        push(format!(
            "network cidr {} has host bits set (did you mean {}?)",
            net.cidr,
            net.cidr.trunc()
        ));
    }
    if net.max_azs == 0 {
        push("network max_azs must be at least 1".to_string());
    }
    if !EXPORT_NAME.is_match(&net.export_name) {
        push(format!("invalid export name '{}'", net.export_name));
    }
    if net.subnets.is_empty() {
        push("network needs at least one subnet tier".to_string());
    }

    let mut names = HashSet::new();
    for s in &net.subnets {
        if s.name.is_empty() || !s.name.chars().all(|c| c.is_ascii_alphanumeric()) {
            push(format!("subnet tier name '{}' must be alphanumeric", s.name));
        }
        if !names.insert(s.name.as_str()) {
            push(format!("subnet tier '{}' is declared twice", s.name));
        }
        if s.cidr_mask < net.cidr.prefix_len() || s.cidr_mask > 28 {
            push(format!(
                "subnet tier '{}' mask /{} must be between /{} and /28",
                s.name,
                s.cidr_mask,
                net.cidr.prefix_len()
            ));
        }
        if s.map_public_ip_on_launch && s.subnet_type != SubnetType::Public {
            push(format!(
                "subnet tier '{}' maps public IPs but is not public",
                s.name
            ));
        }
    }

    // None means the total overflowed, which never fits
    let needed: Option<u64> = net
        .subnets
        .iter()
        .filter(|s| s.cidr_mask <= 32)
        .try_fold(0u64, |acc, s| {
            let per_az = 1u64 << (32 - u32::from(s.cidr_mask));
            u64::try_from(net.max_azs)
                .ok()
                .and_then(|azs| per_az.checked_mul(azs))
                .and_then(|tier| acc.checked_add(tier))
        });
    let available = 1u64 << (32 - u32::from(net.cidr.prefix_len()));
    match needed {
        Some(needed) if needed <= available => {}
        Some(needed) => push(format!(
            "subnet tiers need {} addresses but {} only holds {}",
            needed, net.cidr, available
        )),
        None => push(format!(
            "subnet tiers across {} availability zones overflow {}",
            net.max_azs, net.cidr
        )),
    }

    let has_public = net.subnets.iter().any(|s| s.subnet_type == SubnetType::Public);
    let has_private = net
        .subnets
        .iter()
        .any(|s| s.subnet_type == SubnetType::PrivateWithEgress);
    if has_private && !has_public {
        push("private_with_egress subnets need a public tier for NAT".to_string());
    }
    if has_private && net.nat_gateways == 0 {
        push("private_with_egress subnets need at least one NAT gateway".to_string());
    }
    if net.nat_gateways > net.max_azs {
        push(format!(
            "nat_gateways ({}) exceeds max_azs ({})",
            net.nat_gateways, net.max_azs
        ));
    }
}

fn validate_compute(c: &ComputeConfig, push: &mut impl FnMut(String)) {
    if c.cluster_name.is_empty() {
        push("compute cluster_name must not be empty".to_string());
    }
    if !INSTANCE_TYPE.is_match(&c.instance_type) {
        push(format!("invalid instance type '{}'", c.instance_type));
    }
    check_range("autoscaling group", c.min_capacity, c.max_capacity, push);
    check_cpu("autoscaling group", c.cpu_target_percent, push);

    let s = &c.service;
    check_range("service", s.min_capacity, s.max_capacity, push);
    check_cpu("service", s.cpu_target_percent, push);
    if s.desired_count < s.min_capacity || s.desired_count > s.max_capacity {
        push(format!(
            "service desired_count {} outside {}..{}",
            s.desired_count, s.min_capacity, s.max_capacity
        ));
    }

    let ct = &c.container;
    if ct.name.is_empty() {
        push("container name must not be empty".to_string());
    }
    if ct.memory_mib < 6 {
        push(format!("container memory_mib {} is below 6", ct.memory_mib));
    }
    if ct.port == 0 {
        push("container port must not be 0".to_string());
    }
    if !ct.health_check.path.starts_with('/') {
        push(format!(
            "health check path '{}' must start with '/'",
            ct.health_check.path
        ));
    }
    let hc = &ct.health_check;
    if !(5..=300).contains(&hc.interval_seconds) {
        push(format!(
            "health check interval {}s outside 5..300",
            hc.interval_seconds
        ));
    }
    if !(2..=120).contains(&hc.timeout_seconds) {
        push(format!(
            "health check timeout {}s outside 2..120",
            hc.timeout_seconds
        ));
    }
    if !(1..=10).contains(&hc.retries) {
        push(format!("health check retries {} outside 1..10", hc.retries));
    }

    let lb = &c.load_balancer;
    if lb.listener_port == 0 {
        push("listener_port must not be 0".to_string());
    }
    if !lb.health_check_path.starts_with('/') {
        push(format!(
            "target health check path '{}' must start with '/'",
            lb.health_check_path
        ));
    }
}

fn validate_edge(e: &EdgeConfig, push: &mut impl FnMut(String)) {
    if e.default_root_object.starts_with('/') {
        push(format!(
            "default_root_object '{}' must not start with '/'",
            e.default_root_object
        ));
    }
    for name in e.custom_headers.keys() {
        if !HEADER_NAME.is_match(name) {
            push(format!("invalid custom header name '{}'", name));
        }
    }
}

fn check_range(what: &str, min: u32, max: u32, push: &mut impl FnMut(String)) {
    if min > max {
        push(format!("{} min_capacity {} exceeds max_capacity {}", what, min, max));
    }
    if max == 0 {
        push(format!("{} max_capacity must be at least 1", what));
    }
}

fn check_cpu(what: &str, percent: u32, push: &mut impl FnMut(String)) {
    if percent == 0 || percent > 100 {
        push(format!("{} cpu_target_percent {} outside 1..100", what, percent));
    }
}

/// Resolve the deployment environment: config value, else the given
/// environment variable lookup, else unresolved.
pub fn resolve_environment(
    env: &EnvConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Environment {
    let pick = |explicit: &Option<String>, var: &str| {
        explicit
            .clone()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| lookup(var).filter(|v| !v.trim().is_empty()))
    };
    Environment {
        account: pick(&env.account, ACCOUNT_ENV),
        region: pick(&env.region, REGION_ENV),
    }
}

//! RK-011: Configuration schema, deployment environment and plan types.
//!
//! Every field defaults to the reference deployment, so an empty
//! `rafiki.yaml` (or none at all) synthesizes the stock three-stack app.

use indexmap::IndexMap;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Top-level rafiki.yaml
// ============================================================================

/// Root configuration for one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Schema version (must be "1.0")
    #[serde(default = "default_version")]
    pub version: String,

    /// Deployment name
    #[serde(default = "default_name")]
    pub name: String,

    /// Account/region overrides
    #[serde(default)]
    pub env: EnvConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub compute: ComputeConfig,

    #[serde(default)]
    pub edge: EdgeConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            name: default_name(),
            env: EnvConfig::default(),
            network: NetworkConfig::default(),
            compute: ComputeConfig::default(),
            edge: EdgeConfig::default(),
        }
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_name() -> String {
    "rafiki".to_string()
}

/// Explicit account and region. Unset fields fall back to
/// `CDK_DEFAULT_ACCOUNT` / `CDK_DEFAULT_REGION`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvConfig {
    #[serde(default)]
    pub account: Option<String>,

    #[serde(default)]
    pub region: Option<String>,
}

// ============================================================================
// Network stage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub stack_name: String,

    /// VPC address block
    pub cidr: Ipv4Net,

    /// Availability zones to spread each subnet tier over
    pub max_azs: usize,

    /// NAT gateways shared by the private subnets
    pub nat_gateways: usize,

    /// Export name for the VPC id output
    pub export_name: String,

    /// Subnet tiers, carved from `cidr` in this order
    pub subnets: Vec<SubnetConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            stack_name: "VpcStack".to_string(),
            cidr: Ipv4Net::new(std::net::Ipv4Addr::new(10, 0, 0, 0), 16)
                .unwrap_or_default(),
            max_azs: 2,
            nat_gateways: 1,
            export_name: "VpcId".to_string(),
            subnets: vec![
                SubnetConfig {
                    name: "ServerPrivate".to_string(),
                    subnet_type: SubnetType::PrivateWithEgress,
                    cidr_mask: 24,
                    map_public_ip_on_launch: false,
                },
                SubnetConfig {
                    name: "ServerPublic".to_string(),
                    subnet_type: SubnetType::Public,
                    cidr_mask: 24,
                    map_public_ip_on_launch: true,
                },
            ],
        }
    }
}

/// One subnet tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubnetConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub subnet_type: SubnetType,

    pub cidr_mask: u8,

    #[serde(default)]
    pub map_public_ip_on_launch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetType {
    Public,
    PrivateWithEgress,
}

impl fmt::Display for SubnetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::PrivateWithEgress => write!(f, "private_with_egress"),
        }
    }
}

// ============================================================================
// Compute stage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComputeConfig {
    pub stack_name: String,

    pub cluster_name: String,

    /// EC2 instance type for the capacity pool
    pub instance_type: String,

    /// SSM parameter resolving the ECS-optimized AMI
    pub machine_image_parameter: String,

    /// Autoscaling group bounds
    pub min_capacity: u32,
    pub max_capacity: u32,

    /// Target average CPU for the autoscaling group
    pub cpu_target_percent: u32,

    pub container: ContainerConfig,

    pub service: ServiceConfig,

    pub load_balancer: LoadBalancerConfig,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            stack_name: "WebSocketEcsStack".to_string(),
            cluster_name: "websocket-service".to_string(),
            instance_type: "t3.micro".to_string(),
            machine_image_parameter:
                "/aws/service/ecs/optimized-ami/amazon-linux-2/recommended/image_id".to_string(),
            min_capacity: 1,
            max_capacity: 1,
            cpu_target_percent: 70,
            container: ContainerConfig::default(),
            service: ServiceConfig::default(),
            load_balancer: LoadBalancerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContainerConfig {
    pub name: String,

    /// Local directory holding the image's Dockerfile
    pub image_path: String,

    pub memory_mib: u32,

    pub port: u16,

    pub log_stream_prefix: String,

    pub health_check: HealthCheckConfig,

    pub environment: IndexMap<String, String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            name: "websocket-service".to_string(),
            image_path: "assets/container-image".to_string(),
            memory_mib: 512,
            port: 8080,
            log_stream_prefix: "websocket-service".to_string(),
            health_check: HealthCheckConfig::default(),
            environment: IndexMap::new(),
        }
    }
}

/// Container-level health probe, run by the agent inside the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthCheckConfig {
    pub path: String,
    pub interval_seconds: u32,
    pub timeout_seconds: u32,
    pub retries: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            interval_seconds: 30,
            timeout_seconds: 30,
            retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub desired_count: u32,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub cpu_target_percent: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            desired_count: 1,
            min_capacity: 1,
            max_capacity: 1,
            cpu_target_percent: 70,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadBalancerConfig {
    pub listener_port: u16,

    /// Admit the whole internet on the listener port
    pub open: bool,

    pub internet_facing: bool,

    /// Target group health check path
    pub health_check_path: String,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            listener_port: 80,
            open: true,
            internet_facing: false,
            health_check_path: "/".to_string(),
        }
    }
}

// ============================================================================
// Edge stage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EdgeConfig {
    pub stack_name: String,

    pub default_root_object: String,

    pub price_class: PriceClass,

    /// Write access logs to a dedicated bucket
    pub logging: bool,

    /// Headers added to every origin request
    pub custom_headers: IndexMap<String, String>,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            stack_name: "DistributionStack".to_string(),
            default_root_object: "index.html".to_string(),
            price_class: PriceClass::PriceClass100,
            logging: false,
            custom_headers: IndexMap::new(),
        }
    }
}

/// Edge location tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceClass {
    #[default]
    #[serde(rename = "PriceClass_100")]
    PriceClass100,
    #[serde(rename = "PriceClass_200")]
    PriceClass200,
    #[serde(rename = "PriceClass_All")]
    PriceClassAll,
}

impl fmt::Display for PriceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PriceClass100 => write!(f, "PriceClass_100"),
            Self::PriceClass200 => write!(f, "PriceClass_200"),
            Self::PriceClassAll => write!(f, "PriceClass_All"),
        }
    }
}

// ============================================================================
// Deployment environment
// ============================================================================

/// Target account and region. Either may stay unresolved until deploy time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl Environment {
    pub fn is_agnostic(&self) -> bool {
        self.account.is_none() || self.region.is_none()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.account, &self.region) {
            (Some(account), Some(region)) => write!(f, "aws://{}/{}", account, region),
            _ => write!(f, "aws://unknown-account/unknown-region"),
        }
    }
}

// ============================================================================
// Diff plan
// ============================================================================

/// Action the control plane would take on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub stack: String,
    pub logical_id: String,
    pub resource_type: String,
    pub action: PlanAction,
}

/// Changes between two assemblies.
#[derive(Debug, Clone, Default)]
pub struct DiffPlan {
    /// Changes grouped by stack, stacks in deployment order
    pub changes: Vec<PlannedChange>,

    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}

impl DiffPlan {
    pub fn is_empty(&self) -> bool {
        self.to_create == 0 && self.to_update == 0 && self.to_destroy == 0
    }
}

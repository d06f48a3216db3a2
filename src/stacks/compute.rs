//! RK-010: Compute stage: ECS cluster on an EC2 autoscaling group, one
//! containerized service and the private load balancer in front of it.

use super::network::NetworkHandle;
use crate::core::app::App;
use crate::core::assembly::ImageAsset;
use crate::core::construct::Scope;
use crate::core::error::{Error, Result};
use crate::core::intrinsic;
use crate::core::template::{Attr, Parameter, RemovalPolicy, Resource, ResourceRef};
use crate::core::types::ComputeConfig;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// ECR repository container images are published to.
pub const ASSET_REPOSITORY: &str = "rafiki-container-assets";

const SSM_IMAGE_TYPE: &str = "AWS::SSM::Parameter::Value<AWS::EC2::Image::Id>";
const AUTOSCALING_ROLE: &str = ":role/aws-service-role/ecs.application-autoscaling.amazonaws.com/AWSServiceRoleForApplicationAutoScaling_ECSService";

/// What the edge stage needs from compute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerHandle {
    pub load_balancer: ResourceRef,
    pub listener: ResourceRef,
    pub target_group: ResourceRef,
    pub security_group: ResourceRef,
    pub cluster: ResourceRef,
    pub service: ResourceRef,
}

impl LoadBalancerHandle {
    pub fn stack(&self) -> &str {
        &self.load_balancer.stack
    }
}

/// Builder for the compute stack.
pub struct ComputeStack<'a> {
    config: &'a ComputeConfig,
    network: Option<&'a NetworkHandle>,
    asset_root: PathBuf,
}

impl<'a> ComputeStack<'a> {
    pub fn new(config: &'a ComputeConfig) -> Self {
        Self {
            config,
            network: None,
            asset_root: PathBuf::from("."),
        }
    }

    pub fn network(mut self, network: &'a NetworkHandle) -> Self {
        self.network = Some(network);
        self
    }

    /// Directory the container `image_path` is relative to.
    pub fn asset_root(mut self, root: &Path) -> Self {
        self.asset_root = root.to_path_buf();
        self
    }

    pub fn build(self, app: &mut App) -> Result<LoadBalancerHandle> {
        let cfg = self.config;
        let name = cfg.stack_name.as_str();
        let network = self
            .network
            .ok_or_else(|| Error::missing(name, "a network handle"))?;
        if app.stack(network.stack()).is_err() {
            return Err(Error::missing(
                name,
                &format!("network stack '{}' registered in this app", network.stack()),
            ));
        }

        let mut asset = ImageAsset::from_directory(
            &self.asset_root.join(&cfg.container.image_path),
            ASSET_REPOSITORY,
        )?;
        asset.directory = cfg.container.image_path.clone();

        app.add_stack(name, "ECS cluster, websocket service and private load balancer")?;

        let vpc_id = app.reference(name, &network.vpc, Attr::Ref)?;
        let private_subnets = import_all(app, name, &network.private_subnets)?;
        let lb_subnets = if cfg.load_balancer.internet_facing {
            import_all(app, name, &network.public_subnets)?
        } else {
            private_subnets.clone()
        };

        let stack = app.stack_mut(name)?;
        stack.add_image_asset(asset.clone());
        let scope = Scope::root("ECSResources");
        let description = |s: &Scope| format!("{}/{}", name, s.path());

        // Cluster and its EC2 capacity
        let cluster_id = scope.child("Cluster").logical_id();
        let cluster = stack.add_resource(
            &cluster_id,
            Resource::new(
                "AWS::ECS::Cluster",
                json!({ "ClusterName": cfg.cluster_name }),
            ),
        )?;

        let instance_role_id = scope.child("EcsInstanceRole").logical_id();
        stack.add_resource(
            &instance_role_id,
            Resource::new(
                "AWS::IAM::Role",
                json!({
                    "AssumeRolePolicyDocument": assume_role("ec2.amazonaws.com"),
                    "ManagedPolicyArns": [
                        intrinsic::managed_policy_arn("service-role/AmazonEC2ContainerServiceforEC2Role"),
                        intrinsic::managed_policy_arn("AmazonSSMManagedInstanceCore"),
                    ],
                }),
            ),
        )?;

        let lt_scope = scope.child("LaunchTemplate");
        let profile_id = lt_scope.child("Profile").logical_id();
        stack.add_resource(
            &profile_id,
            Resource::new(
                "AWS::IAM::InstanceProfile",
                json!({ "Roles": [intrinsic::ref_(&instance_role_id)] }),
            ),
        )?;

        let lt_sg_scope = scope.child("LaunchTemplateSecurityGroup");
        let lt_sg_id = lt_sg_scope.logical_id();
        stack.add_resource(
            &lt_sg_id,
            security_group(&description(&lt_sg_scope), &vpc_id, vec![]),
        )?;

        let ami_id = image_parameter_id(&cfg.machine_image_parameter);
        stack.add_parameter(
            &ami_id,
            Parameter {
                parameter_type: SSM_IMAGE_TYPE.to_string(),
                default: Some(json!(cfg.machine_image_parameter)),
                description: None,
            },
        )?;

        let lt_id = lt_scope.logical_id();
        stack.add_resource(
            &lt_id,
            Resource::new(
                "AWS::EC2::LaunchTemplate",
                json!({
                    "LaunchTemplateData": {
                        "IamInstanceProfile": {
                            "Arn": intrinsic::get_att(&profile_id, "Arn"),
                        },
                        "ImageId": intrinsic::ref_(&ami_id),
                        "InstanceType": cfg.instance_type,
                        "SecurityGroupIds": [intrinsic::get_att(&lt_sg_id, "GroupId")],
                        "UserData": user_data(&cluster_id),
                    },
                    "TagSpecifications": [{
                        "ResourceType": "launch-template",
                        "Tags": [{ "Key": "Name", "Value": description(&lt_scope) }],
                    }],
                }),
            )
            .depends_on(&instance_role_id),
        )?;

        let asg_scope = scope.child("ASG");
        let asg_id = asg_scope.logical_id();
        stack.add_resource(
            &asg_id,
            Resource::new(
                "AWS::AutoScaling::AutoScalingGroup",
                json!({
                    "LaunchTemplate": {
                        "LaunchTemplateId": intrinsic::ref_(&lt_id),
                        "Version": intrinsic::get_att(&lt_id, "LatestVersionNumber"),
                    },
                    "MaxSize": cfg.max_capacity.to_string(),
                    "MinSize": cfg.min_capacity.to_string(),
                    "NewInstancesProtectedFromScaleIn": false,
                    "VPCZoneIdentifier": private_subnets,
                }),
            ),
        )?;
        stack.add_resource(
            &asg_scope.child("ScalingPolicyCpuScaling").logical_id(),
            Resource::new(
                "AWS::AutoScaling::ScalingPolicy",
                json!({
                    "AutoScalingGroupName": intrinsic::ref_(&asg_id),
                    "PolicyType": "TargetTrackingScaling",
                    "TargetTrackingConfiguration": {
                        "PredefinedMetricSpecification": {
                            "PredefinedMetricType": "ASGAverageCPUUtilization",
                        },
                        "TargetValue": cfg.cpu_target_percent,
                    },
                }),
            ),
        )?;

        let cp_id = scope.child("AsgCapacityProvider").logical_id();
        stack.add_resource(
            &cp_id,
            Resource::new(
                "AWS::ECS::CapacityProvider",
                json!({
                    "AutoScalingGroupProvider": {
                        "AutoScalingGroupArn": intrinsic::ref_(&asg_id),
                        "ManagedScaling": {
                            "Status": "ENABLED",
                            "TargetCapacity": 100,
                        },
                        "ManagedTerminationProtection": "DISABLED",
                    },
                }),
            ),
        )?;
        stack.add_resource(
            &scope.child("Cluster").child("CapacityProviderAssociations").logical_id(),
            Resource::new(
                "AWS::ECS::ClusterCapacityProviderAssociations",
                json!({
                    "CapacityProviders": [intrinsic::ref_(&cp_id)],
                    "Cluster": intrinsic::ref_(&cluster_id),
                    "DefaultCapacityProviderStrategy": [],
                }),
            ),
        )?;

        // Security groups
        let lb_cfg = &cfg.load_balancer;
        let alb_sg_scope = scope.child("ALBSecurityGroup");
        let alb_sg_id = alb_sg_scope.logical_id();
        let alb_ingress = if lb_cfg.open {
            vec![json!({
                "CidrIp": "0.0.0.0/0",
                "Description": format!("Allow from anyone on port {}", lb_cfg.listener_port),
                "FromPort": lb_cfg.listener_port,
                "IpProtocol": "tcp",
                "ToPort": lb_cfg.listener_port,
            })]
        } else {
            vec![]
        };
        let alb_sg = stack.add_resource(
            &alb_sg_id,
            security_group(&description(&alb_sg_scope), &vpc_id, alb_ingress),
        )?;

        let svc_sg_scope = scope.child("webSocketServiceSecurityGroup");
        let svc_sg_id = svc_sg_scope.logical_id();
        stack.add_resource(
            &svc_sg_id,
            security_group(&description(&svc_sg_scope), &vpc_id, vec![]),
        )?;

        let port = cfg.container.port;
        stack.add_resource(
            &svc_sg_scope.child(&format!("from{}{}", alb_sg_id, port)).logical_id(),
            Resource::new(
                "AWS::EC2::SecurityGroupIngress",
                json!({
                    "Description": format!(
                        "allow traffic on port {} from the ALB security group",
                        port
                    ),
                    "FromPort": port,
                    "GroupId": intrinsic::get_att(&svc_sg_id, "GroupId"),
                    "IpProtocol": "tcp",
                    "SourceSecurityGroupId": intrinsic::get_att(&alb_sg_id, "GroupId"),
                    "ToPort": port,
                }),
            ),
        )?;

        // Task definition
        let task_role_id = scope.child("WebSocketServiceRole").logical_id();
        stack.add_resource(
            &task_role_id,
            Resource::new(
                "AWS::IAM::Role",
                json!({ "AssumeRolePolicyDocument": assume_role("ecs-tasks.amazonaws.com") }),
            ),
        )?;

        let td_scope = scope.child("TaskDefinition");
        let exec_role_id = td_scope.child("ExecutionRole").logical_id();
        stack.add_resource(
            &exec_role_id,
            Resource::new(
                "AWS::IAM::Role",
                json!({
                    "AssumeRolePolicyDocument": assume_role("ecs-tasks.amazonaws.com"),
                    "ManagedPolicyArns": [
                        intrinsic::managed_policy_arn("service-role/AmazonECSTaskExecutionRolePolicy"),
                    ],
                }),
            ),
        )?;

        let container_scope = td_scope.child(&cfg.container.name);
        let log_group_id = container_scope.child("LogGroup").logical_id();
        stack.add_resource(
            &log_group_id,
            Resource::new("AWS::Logs::LogGroup", Value::Null).removal_policy(RemovalPolicy::Retain),
        )?;

        let td_id = td_scope.logical_id();
        stack.add_resource(
            &td_id,
            Resource::new(
                "AWS::ECS::TaskDefinition",
                json!({
                    "ContainerDefinitions": [container_definition(cfg, &asset, &log_group_id)],
                    "ExecutionRoleArn": intrinsic::get_att(&exec_role_id, "Arn"),
                    "Family": format!("{}{}", name.replace('-', ""), td_id),
                    "NetworkMode": "awsvpc",
                    "RequiresCompatibilities": ["EC2"],
                    "TaskRoleArn": intrinsic::get_att(&task_role_id, "Arn"),
                }),
            ),
        )?;

        // Load balancing
        let tg_id = scope.child("TargetGroup").logical_id();
        let target_group = stack.add_resource(
            &tg_id,
            Resource::new(
                "AWS::ElasticLoadBalancingV2::TargetGroup",
                json!({
                    "HealthCheckPath": lb_cfg.health_check_path,
                    "HealthCheckPort": port.to_string(),
                    "HealthCheckProtocol": "HTTP",
                    "Port": port,
                    "Protocol": "HTTP",
                    "TargetGroupAttributes": [
                        { "Key": "stickiness.enabled", "Value": "false" },
                    ],
                    "TargetType": "ip",
                    "VpcId": vpc_id,
                }),
            ),
        )?;

        let lb_id = scope.child("LB").logical_id();
        let scheme = if lb_cfg.internet_facing {
            "internet-facing"
        } else {
            "internal"
        };
        let load_balancer = stack.add_resource(
            &lb_id,
            Resource::new(
                "AWS::ElasticLoadBalancingV2::LoadBalancer",
                json!({
                    "LoadBalancerAttributes": [
                        { "Key": "deletion_protection.enabled", "Value": "false" },
                    ],
                    "Scheme": scheme,
                    "SecurityGroups": [intrinsic::get_att(&alb_sg_id, "GroupId")],
                    "Subnets": lb_subnets,
                    "Type": "application",
                }),
            ),
        )?;

        let listener_id = scope.child("LB").child("Listener").logical_id();
        let listener = stack.add_resource(
            &listener_id,
            Resource::new(
                "AWS::ElasticLoadBalancingV2::Listener",
                json!({
                    "DefaultActions": [{
                        "TargetGroupArn": intrinsic::ref_(&tg_id),
                        "Type": "forward",
                    }],
                    "LoadBalancerArn": intrinsic::ref_(&lb_id),
                    "Port": lb_cfg.listener_port,
                    "Protocol": "HTTP",
                }),
            ),
        )?;

        // Service and task-count scaling
        let svc = &cfg.service;
        let service_scope = scope.child("Service");
        let service_id = service_scope.logical_id();
        let service = stack.add_resource(
            &service_id,
            Resource::new(
                "AWS::ECS::Service",
                json!({
                    "Cluster": intrinsic::ref_(&cluster_id),
                    "DeploymentConfiguration": {
                        "MaximumPercent": 200,
                        "MinimumHealthyPercent": 50,
                    },
                    "DesiredCount": svc.desired_count,
                    "EnableECSManagedTags": false,
                    "HealthCheckGracePeriodSeconds": 60,
                    "LaunchType": "EC2",
                    "LoadBalancers": [{
                        "ContainerName": cfg.container.name,
                        "ContainerPort": port,
                        "TargetGroupArn": intrinsic::ref_(&tg_id),
                    }],
                    "NetworkConfiguration": {
                        "AwsvpcConfiguration": {
                            "AssignPublicIp": "DISABLED",
                            "SecurityGroups": [intrinsic::get_att(&svc_sg_id, "GroupId")],
                            "Subnets": private_subnets,
                        },
                    },
                    "SchedulingStrategy": "REPLICA",
                    "TaskDefinition": intrinsic::ref_(&td_id),
                }),
            )
            .depends_on(&listener_id)
            .depends_on(&task_role_id),
        )?;

        let target_scope = service_scope.child("TaskCount").child("Target");
        let target_id = target_scope.logical_id();
        stack.add_resource(
            &target_id,
            Resource::new(
                "AWS::ApplicationAutoScaling::ScalableTarget",
                json!({
                    "MaxCapacity": svc.max_capacity,
                    "MinCapacity": svc.min_capacity,
                    "ResourceId": intrinsic::join("/", vec![
                        json!("service"),
                        intrinsic::ref_(&cluster_id),
                        intrinsic::get_att(&service_id, "Name"),
                    ]),
                    "RoleARN": intrinsic::join("", vec![
                        json!("arn:"),
                        intrinsic::ref_(intrinsic::PARTITION),
                        json!(":iam::"),
                        intrinsic::ref_(intrinsic::ACCOUNT_ID),
                        json!(AUTOSCALING_ROLE),
                    ]),
                    "ScalableDimension": "ecs:service:DesiredCount",
                    "ServiceNamespace": "ecs",
                }),
            ),
        )?;
        let policy_scope = target_scope.child("CpuScaling");
        stack.add_resource(
            &policy_scope.logical_id(),
            Resource::new(
                "AWS::ApplicationAutoScaling::ScalingPolicy",
                json!({
                    "PolicyName": format!("{}{}", name.replace('-', ""), policy_scope.logical_id()),
                    "PolicyType": "TargetTrackingScaling",
                    "ScalingTargetId": intrinsic::ref_(&target_id),
                    "TargetTrackingScalingPolicyConfiguration": {
                        "PredefinedMetricSpecification": {
                            "PredefinedMetricType": "ECSServiceAverageCPUUtilization",
                        },
                        "TargetValue": svc.cpu_target_percent,
                    },
                }),
            ),
        )?;

        tracing::info!(
            stack = name,
            cluster = %cfg.cluster_name,
            image = %asset.image_tag,
            resources = stack.template().resources.len(),
            "compute stage declared"
        );

        Ok(LoadBalancerHandle {
            load_balancer,
            listener,
            target_group,
            security_group: alb_sg,
            cluster,
            service,
        })
    }
}

fn import_all(app: &mut App, consumer: &str, refs: &[ResourceRef]) -> Result<Vec<Value>> {
    refs.iter()
        .map(|r| app.reference(consumer, r, Attr::Ref))
        .collect()
}

fn assume_role(service: &str) -> Value {
    json!({
        "Statement": [{
            "Action": "sts:AssumeRole",
            "Effect": "Allow",
            "Principal": { "Service": service },
        }],
        "Version": "2012-10-17",
    })
}

/// Security group with unrestricted egress.
fn security_group(description: &str, vpc_id: &Value, ingress: Vec<Value>) -> Resource {
    let mut props = json!({
        "GroupDescription": description,
        "SecurityGroupEgress": [{
            "CidrIp": "0.0.0.0/0",
            "Description": "Allow all outbound traffic by default",
            "IpProtocol": "-1",
        }],
        "VpcId": vpc_id,
    });
    if !ingress.is_empty() {
        props["SecurityGroupIngress"] = Value::Array(ingress);
    }
    Resource::new("AWS::EC2::SecurityGroup", props)
}

/// Instances join the cluster through the ECS agent config file.
fn user_data(cluster_id: &str) -> Value {
    intrinsic::base64(intrinsic::join(
        "",
        vec![
            json!("#!/bin/bash\necho ECS_CLUSTER="),
            intrinsic::ref_(cluster_id),
            json!(" >> /tmp/ecs.config\necho ECS_CLUSTER="),
            intrinsic::ref_(cluster_id),
            json!(" >> /etc/ecs/ecs.config"),
        ],
    ))
}

fn image_parameter_id(parameter: &str) -> String {
    let stripped: String = parameter.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    let digest = crate::core::hasher::digest_hex(parameter);
    format!("SsmParameterValue{}{}", stripped, digest[..8].to_ascii_uppercase())
}

fn image_uri(asset: &ImageAsset) -> Value {
    intrinsic::sub(&format!(
        "${{AWS::AccountId}}.dkr.ecr.${{AWS::Region}}.${{AWS::URLSuffix}}/{}:{}",
        asset.repository_name, asset.image_tag
    ))
}

fn container_definition(cfg: &ComputeConfig, asset: &ImageAsset, log_group_id: &str) -> Value {
    let c = &cfg.container;
    let hc = &c.health_check;
    let mut def = json!({
        "Essential": true,
        "HealthCheck": {
            "Command": [
                "CMD-SHELL",
                format!("curl -f http://localhost:{}{}", c.port, hc.path),
            ],
            "Interval": hc.interval_seconds,
            "Retries": hc.retries,
            "Timeout": hc.timeout_seconds,
        },
        "Image": image_uri(asset),
        "LogConfiguration": {
            "LogDriver": "awslogs",
            "Options": {
                "awslogs-group": intrinsic::ref_(log_group_id),
                "awslogs-stream-prefix": c.log_stream_prefix,
                "awslogs-region": intrinsic::ref_(intrinsic::REGION),
            },
        },
        "Memory": c.memory_mib,
        "Name": c.name,
        "PortMappings": [{
            "ContainerPort": c.port,
            "HostPort": c.port,
            "Protocol": "tcp",
        }],
    });
    if !c.environment.is_empty() {
        let env: Vec<Value> = c
            .environment
            .iter()
            .map(|(k, v)| json!({ "Name": k, "Value": v }))
            .collect();
        def["Environment"] = Value::Array(env);
    }
    def
}

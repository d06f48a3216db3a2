//! RK-009: Network stage. VPC, subnet tiers, gateways and routing.
//!
//! Each subnet tier is placed once per availability zone. Blocks are carved
//! from the VPC range in declaration order, every block aligned to its own
//! size. Private tiers reach the internet through NAT gateways living in the
//! first public subnets; public tiers route straight to the internet gateway.

use crate::core::app::App;
use crate::core::construct::Scope;
use crate::core::error::{Error, Result};
use crate::core::intrinsic;
use crate::core::template::{Export, Output, Resource, ResourceRef};
use crate::core::types::{NetworkConfig, SubnetConfig, SubnetType};
use ipnet::Ipv4Net;
use serde_json::{json, Value};
use std::net::Ipv4Addr;

/// What downstream stages need from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkHandle {
    pub vpc: ResourceRef,
    pub private_subnets: Vec<ResourceRef>,
    pub public_subnets: Vec<ResourceRef>,
    pub availability_zones: usize,
}

impl NetworkHandle {
    pub fn stack(&self) -> &str {
        &self.vpc.stack
    }
}

/// Builder for the network stack.
pub struct NetworkStack<'a> {
    config: &'a NetworkConfig,
}

impl<'a> NetworkStack<'a> {
    pub fn new(config: &'a NetworkConfig) -> Self {
        Self { config }
    }

    /// Register the stack in `app` and declare every network resource.
    pub fn build(self, app: &mut App) -> Result<NetworkHandle> {
        let cfg = self.config;
        let blocks = carve_subnets(cfg.cidr, &cfg.subnets, cfg.max_azs)?;
        let has_public = cfg
            .subnets
            .iter()
            .any(|s| s.subnet_type == SubnetType::Public);
        let has_private = cfg
            .subnets
            .iter()
            .any(|s| s.subnet_type == SubnetType::PrivateWithEgress);
        if has_private && (!has_public || cfg.nat_gateways == 0) {
            return Err(Error::Validation(vec![format!(
                "stack '{}': private_with_egress subnets have no NAT gateway to route through",
                cfg.stack_name
            )]));
        }

        let stack = app.add_stack(
            &cfg.stack_name,
            "VPC with public and private-with-egress subnets",
        )?;
        let scope = Scope::root("VPCResources").child("VPC");

        let vpc_id = scope.logical_id();
        let vpc = stack.add_resource(
            &vpc_id,
            Resource::new(
                "AWS::EC2::VPC",
                json!({
                    "CidrBlock": cfg.cidr.trunc().to_string(),
                    "EnableDnsHostnames": true,
                    "EnableDnsSupport": true,
                    "InstanceTenancy": "default",
                    "Tags": name_tag(&cfg.stack_name, &scope),
                }),
            ),
        )?;

        let igw_scope = scope.child("IGW");
        let attach_id = scope.child("VPCGW").logical_id();
        if has_public {
            let igw_id = igw_scope.logical_id();
            stack.add_resource(
                &igw_id,
                Resource::new(
                    "AWS::EC2::InternetGateway",
                    json!({ "Tags": name_tag(&cfg.stack_name, &scope) }),
                ),
            )?;
            stack.add_resource(
                &attach_id,
                Resource::new(
                    "AWS::EC2::VPCGatewayAttachment",
                    json!({
                        "InternetGatewayId": intrinsic::ref_(&igw_id),
                        "VpcId": intrinsic::ref_(&vpc_id),
                    }),
                ),
            )?;
        }

        let mut private_subnets = Vec::new();
        let mut public_subnets = Vec::new();
        let mut nat_gateways: Vec<String> = Vec::new();
        // Private tiers are wired after NAT gateways exist
        let mut pending_private: Vec<(Scope, String)> = Vec::new();

        for (tier, tier_blocks) in cfg.subnets.iter().zip(&blocks) {
            for (az, block) in tier_blocks.iter().enumerate() {
                let subnet_scope = scope.child(&format!("{}Subnet{}", tier.name, az + 1));
                let subnet_id = subnet_scope.logical_id();
                let subnet = stack.add_resource(
                    &subnet_id,
                    Resource::new(
                        "AWS::EC2::Subnet",
                        json!({
                            "AvailabilityZone": intrinsic::select(az, intrinsic::get_azs()),
                            "CidrBlock": block.to_string(),
                            "MapPublicIpOnLaunch": tier.map_public_ip_on_launch,
                            "Tags": subnet_tags(&cfg.stack_name, &subnet_scope, tier),
                            "VpcId": intrinsic::ref_(&vpc_id),
                        }),
                    ),
                )?;

                let table_id = subnet_scope.child("RouteTable").logical_id();
                stack.add_resource(
                    &table_id,
                    Resource::new(
                        "AWS::EC2::RouteTable",
                        json!({
                            "Tags": name_tag(&cfg.stack_name, &subnet_scope),
                            "VpcId": intrinsic::ref_(&vpc_id),
                        }),
                    ),
                )?;
                stack.add_resource(
                    &subnet_scope.child("RouteTableAssociation").logical_id(),
                    Resource::new(
                        "AWS::EC2::SubnetRouteTableAssociation",
                        json!({
                            "RouteTableId": intrinsic::ref_(&table_id),
                            "SubnetId": intrinsic::ref_(&subnet_id),
                        }),
                    ),
                )?;

                match tier.subnet_type {
                    SubnetType::Public => {
                        stack.add_resource(
                            &subnet_scope.child("DefaultRoute").logical_id(),
                            Resource::new(
                                "AWS::EC2::Route",
                                json!({
                                    "DestinationCidrBlock": "0.0.0.0/0",
                                    "GatewayId": intrinsic::ref_(&igw_scope.logical_id()),
                                    "RouteTableId": intrinsic::ref_(&table_id),
                                }),
                            )
                            .depends_on(&attach_id),
                        )?;

                        if nat_gateways.len() < cfg.nat_gateways {
                            let eip_id = subnet_scope.child("EIP").logical_id();
                            stack.add_resource(
                                &eip_id,
                                Resource::new(
                                    "AWS::EC2::EIP",
                                    json!({
                                        "Domain": "vpc",
                                        "Tags": name_tag(&cfg.stack_name, &subnet_scope),
                                    }),
                                ),
                            )?;
                            let nat_id = subnet_scope.child("NATGateway").logical_id();
                            stack.add_resource(
                                &nat_id,
                                Resource::new(
                                    "AWS::EC2::NatGateway",
                                    json!({
                                        "AllocationId": intrinsic::get_att(&eip_id, "AllocationId"),
                                        "SubnetId": intrinsic::ref_(&subnet_id),
                                        "Tags": name_tag(&cfg.stack_name, &subnet_scope),
                                    }),
                                )
                                .depends_on(&subnet_scope.child("DefaultRoute").logical_id())
                                .depends_on(&subnet_scope.child("RouteTableAssociation").logical_id()),
                            )?;
                            nat_gateways.push(nat_id);
                        }
                        public_subnets.push(subnet);
                    }
                    SubnetType::PrivateWithEgress => {
                        pending_private.push((subnet_scope, table_id));
                        private_subnets.push(subnet);
                    }
                }
            }
        }

        for (i, (subnet_scope, table_id)) in pending_private.iter().enumerate() {
            let nat = &nat_gateways[i % nat_gateways.len()];
            stack.add_resource(
                &subnet_scope.child("DefaultRoute").logical_id(),
                Resource::new(
                    "AWS::EC2::Route",
                    json!({
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "NatGatewayId": intrinsic::ref_(nat),
                        "RouteTableId": intrinsic::ref_(table_id),
                    }),
                ),
            )?;
        }

        stack.add_output(
            "VpcIdOutput",
            Output {
                value: intrinsic::ref_(&vpc_id),
                description: Some("The ID of the VPC".to_string()),
                export: Some(Export {
                    name: cfg.export_name.clone(),
                }),
            },
        )?;

        tracing::info!(
            stack = %cfg.stack_name,
            private = private_subnets.len(),
            public = public_subnets.len(),
            nat_gateways = nat_gateways.len(),
            "network stage declared"
        );

        Ok(NetworkHandle {
            vpc,
            private_subnets,
            public_subnets,
            availability_zones: cfg.max_azs,
        })
    }
}

/// Carve one block per tier and availability zone out of `vpc`.
///
/// Blocks are assigned in tier order, then AZ order, each aligned to its own
/// size. Fails when a mask is wider than the VPC prefix or the VPC runs out
/// of addresses.
pub fn carve_subnets(vpc: Ipv4Net, tiers: &[SubnetConfig], azs: usize) -> Result<Vec<Vec<Ipv4Net>>> {
    let vpc = vpc.trunc();
    let start = u64::from(u32::from(vpc.network()));
    let end = start + (1u64 << (32 - u32::from(vpc.prefix_len())));
    let mut cursor = start;
    let mut out = Vec::with_capacity(tiers.len());

    for tier in tiers {
        if tier.cidr_mask < vpc.prefix_len() || tier.cidr_mask > 32 {
            return Err(Error::InvalidCidr(format!(
                "subnet tier '{}' mask /{} does not fit in {}",
                tier.name, tier.cidr_mask, vpc
            )));
        }
        let size = 1u64 << (32 - u32::from(tier.cidr_mask));
        let mut blocks = Vec::new();
        for _ in 0..azs {
            cursor = cursor.div_ceil(size) * size;
            if cursor + size > end {
                return Err(Error::InvalidCidr(format!(
                    "{} has no room left for subnet tier '{}' (/{})",
                    vpc, tier.name, tier.cidr_mask
                )));
            }
            let base = u32::try_from(cursor)
                .map_err(|_| Error::InvalidCidr(format!("address {} out of range", cursor)))?;
            let block = Ipv4Net::new(Ipv4Addr::from(base), tier.cidr_mask)
                .map_err(|e| Error::InvalidCidr(e.to_string()))?;
            blocks.push(block);
            cursor += size;
        }
        out.push(blocks);
    }
    Ok(out)
}

fn name_tag(stack: &str, scope: &Scope) -> Value {
    json!([{ "Key": "Name", "Value": format!("{}/{}", stack, scope.path()) }])
}

fn subnet_tags(stack: &str, scope: &Scope, tier: &SubnetConfig) -> Value {
    let kind = match tier.subnet_type {
        SubnetType::Public => "Public",
        SubnetType::PrivateWithEgress => "Private",
    };
    json!([
        { "Key": "Name", "Value": format!("{}/{}", stack, scope.path()) },
        { "Key": "rafiki:subnet-name", "Value": tier.name },
        { "Key": "rafiki:subnet-type", "Value": kind },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::template::Template;
    use proptest::prelude::*;

    fn build_default() -> (App, NetworkHandle) {
        let mut app = App::default();
        let handle = NetworkStack::new(&NetworkConfig::default())
            .build(&mut app)
            .unwrap();
        (app, handle)
    }

    fn template(app: &App) -> &Template {
        app.stack("VpcStack").unwrap().template()
    }

    #[test]
    fn test_rk009_four_subnets_one_nat() {
        let (app, handle) = build_default();
        let t = template(&app);
        assert_eq!(t.count_of_type("AWS::EC2::VPC"), 1);
        assert_eq!(t.count_of_type("AWS::EC2::Subnet"), 4);
        assert_eq!(t.count_of_type("AWS::EC2::NatGateway"), 1);
        assert_eq!(t.count_of_type("AWS::EC2::EIP"), 1);
        assert_eq!(t.count_of_type("AWS::EC2::InternetGateway"), 1);
        assert_eq!(t.count_of_type("AWS::EC2::RouteTable"), 4);
        assert_eq!(t.count_of_type("AWS::EC2::Route"), 4);
        assert_eq!(handle.private_subnets.len(), 2);
        assert_eq!(handle.public_subnets.len(), 2);
        assert_eq!(handle.availability_zones, 2);
        assert_eq!(handle.stack(), "VpcStack");
    }

    #[test]
    fn test_rk009_subnet_cidrs_in_declaration_order() {
        let (app, handle) = build_default();
        let t = template(&app);
        let cidr = |r: &ResourceRef| {
            t.resources[&r.logical_id]
                .prop("/CidrBlock")
                .and_then(|v| v.as_str())
                .unwrap()
                .to_string()
        };
        let private: Vec<_> = handle.private_subnets.iter().map(cidr).collect();
        let public: Vec<_> = handle.public_subnets.iter().map(cidr).collect();
        assert_eq!(private, vec!["10.0.0.0/24", "10.0.1.0/24"]);
        assert_eq!(public, vec!["10.0.2.0/24", "10.0.3.0/24"]);
    }

    #[test]
    fn test_rk009_subnets_spread_over_azs() {
        let (app, handle) = build_default();
        let t = template(&app);
        for (i, subnet) in handle.public_subnets.iter().enumerate() {
            let az = t.resources[&subnet.logical_id].prop("/AvailabilityZone").unwrap();
            assert_eq!(az, &json!({"Fn::Select": [i, {"Fn::GetAZs": ""}]}));
        }
        let public_ip = |r: &ResourceRef| {
            t.resources[&r.logical_id]
                .prop("/MapPublicIpOnLaunch")
                .cloned()
        };
        assert_eq!(public_ip(&handle.public_subnets[0]), Some(json!(true)));
        assert_eq!(public_ip(&handle.private_subnets[0]), Some(json!(false)));
    }

    #[test]
    fn test_rk009_private_routes_share_nat() {
        let (app, _) = build_default();
        let t = template(&app);
        let (nat_id, _) = t.resources_of_type("AWS::EC2::NatGateway").next().unwrap();
        let nat_routes: Vec<_> = t
            .resources_of_type("AWS::EC2::Route")
            .filter(|(_, r)| r.prop("/NatGatewayId").is_some())
            .collect();
        assert_eq!(nat_routes.len(), 2);
        for (_, r) in nat_routes {
            assert_eq!(r.prop("/NatGatewayId"), Some(&json!({"Ref": nat_id})));
        }
    }

    #[test]
    fn test_rk009_public_route_waits_for_attachment() {
        let (app, _) = build_default();
        let t = template(&app);
        let (attach_id, _) = t
            .resources_of_type("AWS::EC2::VPCGatewayAttachment")
            .next()
            .unwrap();
        let igw_routes: Vec<_> = t
            .resources_of_type("AWS::EC2::Route")
            .filter(|(_, r)| r.prop("/GatewayId").is_some())
            .collect();
        assert_eq!(igw_routes.len(), 2);
        for (_, r) in igw_routes {
            assert_eq!(r.depends_on, vec![attach_id.clone()]);
        }
    }

    #[test]
    fn test_rk009_vpc_id_exported() {
        let (app, handle) = build_default();
        let out = &template(&app).outputs["VpcIdOutput"];
        assert_eq!(out.value, json!({"Ref": handle.vpc.logical_id}));
        assert_eq!(out.export.as_ref().unwrap().name, "VpcId");
    }

    #[test]
    fn test_rk009_template_validates() {
        let (app, _) = build_default();
        crate::core::resolver::validate_template("VpcStack", template(&app)).unwrap();
    }

    #[test]
    fn test_rk009_second_build_is_duplicate_stack() {
        let (mut app, _) = build_default();
        let err = NetworkStack::new(&NetworkConfig::default())
            .build(&mut app)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateStack(_)));
    }

    #[test]
    fn test_rk009_two_nats_round_robin() {
        let cfg = NetworkConfig {
            nat_gateways: 2,
            ..NetworkConfig::default()
        };
        let mut app = App::default();
        NetworkStack::new(&cfg).build(&mut app).unwrap();
        let t = template(&app);
        assert_eq!(t.count_of_type("AWS::EC2::NatGateway"), 2);
        let targets: std::collections::HashSet<_> = t
            .resources_of_type("AWS::EC2::Route")
            .filter_map(|(_, r)| r.prop("/NatGatewayId").cloned())
            .map(|v| v.to_string())
            .collect();
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_rk009_vpc_too_small() {
        let cfg = NetworkConfig {
            cidr: "10.0.0.0/23".parse().unwrap(),
            ..NetworkConfig::default()
        };
        let mut app = App::default();
        let err = NetworkStack::new(&cfg).build(&mut app).unwrap_err();
        assert!(matches!(err, Error::InvalidCidr(_)));
        // Nothing registered on failure
        assert!(app.stack("VpcStack").is_err());
    }

    #[test]
    fn test_rk009_private_without_nat_registers_nothing() {
        let cfg = NetworkConfig {
            nat_gateways: 0,
            ..NetworkConfig::default()
        };
        let mut app = App::default();
        let err = NetworkStack::new(&cfg).build(&mut app).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("no NAT gateway"));
        assert!(app.stack("VpcStack").is_err());
        assert_eq!(app.stacks().count(), 0);
    }

    #[test]
    fn test_rk009_carve_aligns_blocks() {
        let tiers = vec![
            SubnetConfig {
                name: "Small".to_string(),
                subnet_type: SubnetType::Public,
                cidr_mask: 26,
                map_public_ip_on_launch: true,
            },
            SubnetConfig {
                name: "Big".to_string(),
                subnet_type: SubnetType::PrivateWithEgress,
                cidr_mask: 24,
                map_public_ip_on_launch: false,
            },
        ];
        let blocks = carve_subnets("10.1.0.0/16".parse().unwrap(), &tiers, 1).unwrap();
        assert_eq!(blocks[0][0].to_string(), "10.1.0.0/26");
        assert_eq!(blocks[1][0].to_string(), "10.1.1.0/24");
    }

    #[test]
    fn test_rk009_carve_rejects_wide_mask() {
        let tiers = vec![SubnetConfig {
            name: "Wide".to_string(),
            subnet_type: SubnetType::Public,
            cidr_mask: 8,
            map_public_ip_on_launch: false,
        }];
        assert!(matches!(
            carve_subnets("10.0.0.0/16".parse().unwrap(), &tiers, 2),
            Err(Error::InvalidCidr(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_rk009_carved_blocks_disjoint_and_contained(
            prefix in 8u8..=20,
            masks in proptest::collection::vec(20u8..=28, 1..4),
            azs in 1usize..=3,
        ) {
            let vpc = Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 0), prefix).unwrap().trunc();
            let tiers: Vec<SubnetConfig> = masks
                .iter()
                .enumerate()
                .map(|(i, &m)| SubnetConfig {
                    name: format!("Tier{}", i),
                    subnet_type: SubnetType::Public,
                    cidr_mask: m.max(prefix),
                    map_public_ip_on_launch: false,
                })
                .collect();
            if let Ok(blocks) = carve_subnets(vpc, &tiers, azs) {
                let flat: Vec<Ipv4Net> = blocks.into_iter().flatten().collect();
                prop_assert_eq!(flat.len(), tiers.len() * azs);
                for (i, a) in flat.iter().enumerate() {
                    prop_assert!(vpc.contains(a));
                    for b in &flat[i + 1..] {
                        prop_assert!(!a.contains(b) && !b.contains(a));
                    }
                }
            }
        }

        #[test]
        fn prop_rk009_carving_is_deterministic(mask in 17u8..=28, azs in 1usize..=4) {
            let tiers = vec![SubnetConfig {
                name: "T".to_string(),
                subnet_type: SubnetType::Public,
                cidr_mask: mask,
                map_public_ip_on_launch: false,
            }];
            let vpc: Ipv4Net = "10.0.0.0/16".parse().unwrap();
            let a = carve_subnets(vpc, &tiers, azs);
            let b = carve_subnets(vpc, &tiers, azs);
            prop_assert_eq!(format!("{:?}", a), format!("{:?}", b));
        }
    }
}

//! RK-013: Edge stage: CloudFront distribution fronting the private load
//! balancer through a VPC origin.
//!
//! Caching is disabled and every method, header, cookie and query string is
//! forwarded, so the distribution acts as a pass-through edge.

use super::compute::LoadBalancerHandle;
use crate::core::app::App;
use crate::core::construct::Scope;
use crate::core::error::{Error, Result};
use crate::core::intrinsic;
use crate::core::template::{Attr, Output, RemovalPolicy, Resource, ResourceRef};
use crate::core::types::EdgeConfig;
use indexmap::IndexMap;
use serde_json::{json, Value};

/// Managed cache policy `CachingDisabled`.
pub const CACHING_DISABLED: &str = "4135ea2d-6df8-44a3-9df3-4b5a84be39ad";
/// Managed origin request policy `AllViewer`.
pub const ALL_VIEWER: &str = "216adef6-5c7f-47e4-b989-5492eafa07d3";

const ALLOWED_METHODS: [&str; 7] = ["GET", "HEAD", "OPTIONS", "PUT", "PATCH", "POST", "DELETE"];
const CACHED_METHODS: [&str; 2] = ["GET", "HEAD"];

/// Supplies headers added to every request the edge forwards to the origin.
pub trait OriginHeaderInjector {
    /// `(name, value)` pairs in the order they should be rendered.
    fn headers(&self) -> Vec<(String, String)>;
}

/// Fixed headers, typically from `edge.custom_headers`.
#[derive(Debug, Clone, Default)]
pub struct StaticHeaders {
    headers: IndexMap<String, String>,
}

impl StaticHeaders {
    pub fn new(headers: IndexMap<String, String>) -> Self {
        Self { headers }
    }
}

impl OriginHeaderInjector for StaticHeaders {
    fn headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionHandle {
    pub distribution: ResourceRef,
    pub vpc_origin: ResourceRef,
    pub log_bucket: Option<ResourceRef>,
}

/// Builder for the edge stack.
pub struct EdgeStack<'a> {
    config: &'a EdgeConfig,
    load_balancer: Option<&'a LoadBalancerHandle>,
    injector: Box<dyn OriginHeaderInjector + 'a>,
}

impl<'a> EdgeStack<'a> {
    pub fn new(config: &'a EdgeConfig) -> Self {
        Self {
            config,
            load_balancer: None,
            injector: Box::new(StaticHeaders::new(config.custom_headers.clone())),
        }
    }

    pub fn load_balancer(mut self, handle: &'a LoadBalancerHandle) -> Self {
        self.load_balancer = Some(handle);
        self
    }

    /// Replace the configured static headers.
    pub fn origin_headers(mut self, injector: impl OriginHeaderInjector + 'a) -> Self {
        self.injector = Box::new(injector);
        self
    }

    pub fn build(self, app: &mut App) -> Result<DistributionHandle> {
        let cfg = self.config;
        let name = cfg.stack_name.as_str();
        let lb = self
            .load_balancer
            .ok_or_else(|| Error::missing(name, "a load balancer handle"))?;
        if app.stack(lb.stack()).is_err() {
            return Err(Error::missing(
                name,
                &format!("compute stack '{}' registered in this app", lb.stack()),
            ));
        }

        app.add_stack(name, "CloudFront distribution in front of the private load balancer")?;
        let lb_arn = app.reference(name, &lb.load_balancer, Attr::Ref)?;
        let lb_dns = app.reference(name, &lb.load_balancer, Attr::Att("DNSName"))?;

        let stack = app.stack_mut(name)?;
        let scope = Scope::root("Distribution");
        let origin_scope = scope.child("Origin1");

        let log_bucket = if cfg.logging {
            let bucket_id = Scope::root("DistributionLogBucket").logical_id();
            Some(stack.add_resource(&bucket_id, log_bucket())?)
        } else {
            None
        };

        let vpc_origin_scope = origin_scope.child("VpcOrigin");
        let vpc_origin_id = vpc_origin_scope.logical_id();
        let origin_name: String = format!("{}-{}", name, vpc_origin_id)
            .chars()
            .take(64)
            .collect();
        let vpc_origin = stack.add_resource(
            &vpc_origin_id,
            Resource::new(
                "AWS::CloudFront::VpcOrigin",
                json!({
                    "VpcOriginEndpointConfig": {
                        "Arn": lb_arn,
                        "HTTPPort": 80,
                        "HTTPSPort": 443,
                        "Name": origin_name,
                        "OriginProtocolPolicy": "http-only",
                        "OriginSSLProtocols": ["TLSv1.2"],
                    },
                }),
            ),
        )?;

        let origin_id = origin_scope.logical_id();
        let mut origin = json!({
            "DomainName": lb_dns,
            "Id": origin_id,
            "VpcOriginConfig": {
                "VpcOriginId": intrinsic::get_att(&vpc_origin_id, "Id"),
            },
        });
        let headers = self.injector.headers();
        if !headers.is_empty() {
            tracing::debug!(stack = name, count = headers.len(), "injecting origin headers");
            origin["OriginCustomHeaders"] = Value::Array(
                headers
                    .into_iter()
                    .map(|(k, v)| json!({ "HeaderName": k, "HeaderValue": v }))
                    .collect(),
            );
        }

        let mut config = json!({
            "DefaultCacheBehavior": {
                "AllowedMethods": ALLOWED_METHODS,
                "CachePolicyId": CACHING_DISABLED,
                "CachedMethods": CACHED_METHODS,
                "Compress": true,
                "OriginRequestPolicyId": ALL_VIEWER,
                "TargetOriginId": origin_id,
                "ViewerProtocolPolicy": "allow-all",
            },
            "DefaultRootObject": cfg.default_root_object,
            "Enabled": true,
            "HttpVersion": "http2",
            "IPV6Enabled": true,
            "Origins": [origin],
            "PriceClass": cfg.price_class.to_string(),
        });
        if let Some(bucket) = &log_bucket {
            config["Logging"] = json!({
                "Bucket": intrinsic::get_att(&bucket.logical_id, "RegionalDomainName"),
                "IncludeCookies": false,
            });
        }

        let dist_id = scope.logical_id();
        let distribution = stack.add_resource(
            &dist_id,
            Resource::new(
                "AWS::CloudFront::Distribution",
                json!({ "DistributionConfig": config }),
            ),
        )?;
        stack.add_output(
            "DistributionDomainName",
            Output {
                value: intrinsic::get_att(&dist_id, "DomainName"),
                description: Some("Public domain name of the distribution".to_string()),
                export: None,
            },
        )?;

        tracing::info!(
            stack = name,
            price_class = %cfg.price_class,
            logging = cfg.logging,
            "edge stage declared"
        );

        Ok(DistributionHandle {
            distribution,
            vpc_origin,
            log_bucket,
        })
    }
}

/// Private, encrypted bucket that receives standard access logs.
fn log_bucket() -> Resource {
    Resource::new(
        "AWS::S3::Bucket",
        json!({
            "BucketEncryption": {
                "ServerSideEncryptionConfiguration": [{
                    "ServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" },
                }],
            },
            "OwnershipControls": {
                "Rules": [{ "ObjectOwnership": "BucketOwnerPreferred" }],
            },
            "PublicAccessBlockConfiguration": {
                "BlockPublicAcls": true,
                "BlockPublicPolicy": true,
                "IgnorePublicAcls": true,
                "RestrictPublicBuckets": true,
            },
        }),
    )
    .removal_policy(RemovalPolicy::Delete)
}

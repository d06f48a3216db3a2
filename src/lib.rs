//! Rafiki: typed infrastructure synthesizer.
//!
//! Declares a VPC, an ECS-on-EC2 websocket service behind a private load
//! balancer and a CloudFront distribution in front of it, then renders the
//! three stacks as a deterministic CloudFormation assembly.

pub mod cli;
pub mod core;
pub mod stacks;

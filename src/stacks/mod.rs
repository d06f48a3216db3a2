//! Deployment stages (network, compute, edge) and their composition.
//!
//! Each stage registers one stack in the [`App`] and hands a typed handle
//! to the next. Stages must run in dependency order: Network, Compute, Edge.

pub mod compute;
pub mod edge;
pub mod network;

use crate::core::app::App;
use crate::core::error::Result;
use crate::core::types::AppConfig;
use compute::{ComputeStack, LoadBalancerHandle};
use edge::{DistributionHandle, EdgeStack};
use network::{NetworkHandle, NetworkStack};
use std::path::Path;

/// Handles of every stage of one deployment.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub network: NetworkHandle,
    pub compute: LoadBalancerHandle,
    pub edge: DistributionHandle,
}

/// Compose all stages, resolving asset paths against the working directory.
pub fn compose(app: &mut App, config: &AppConfig) -> Result<Deployment> {
    compose_at(app, config, Path::new("."))
}

/// Compose all stages, resolving asset paths against `base`.
pub fn compose_at(app: &mut App, config: &AppConfig, base: &Path) -> Result<Deployment> {
    let network = NetworkStack::new(&config.network).build(app)?;
    let compute = ComputeStack::new(&config.compute)
        .network(&network)
        .asset_root(base)
        .build(app)?;
    let edge = EdgeStack::new(&config.edge)
        .load_balancer(&compute)
        .build(app)?;
    tracing::info!(
        deployment = %config.name,
        environment = %app.environment(),
        stacks = app.stacks().count(),
        "composition complete"
    );
    Ok(Deployment {
        network,
        compute,
        edge,
    })
}

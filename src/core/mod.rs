//! Core synthesis logic: config, template model, app, resolution, assembly and diff.

pub mod app;
pub mod assembly;
pub mod construct;
pub mod error;
pub mod hasher;
pub mod intrinsic;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod template;
pub mod types;

//! Ballast operator - wires the autoscaler reconcilers into running controllers

pub mod config;
pub mod controller_runner;
pub mod crds;

//! Custom Resource Definitions read and written by ballast

mod capi;
mod cluster;
mod fleet;
mod iam;
mod types;

pub use capi::{
    CapiCluster, CapiClusterSpec, Machine, MachineDeployment, MachineDeploymentSpec,
    MachineDeploymentStatus, MachineSpec, RkeControlPlane, RkeControlPlaneSpec, ScaleBounds,
    RKE_CONTROL_PLANE_KIND,
};
pub use cluster::{
    AutoscalingSpec, MachinePool, ManagedCluster, ManagedClusterSpec, ManagedClusterStatus,
};
pub use fleet::{
    Bundle, BundleSpec, BundleStatus, BundleSummary, BundleTarget, HelmOptions, NonReadyResource,
};
pub use iam::{
    AuthToken, AuthTokenSpec, GlobalRole, GlobalRoleBinding, GlobalRoleBindingSpec,
    GlobalRoleSpec, ServiceIdentity, ServiceIdentitySpec,
};
pub use types::{remove_condition, upsert_condition, Condition, ConditionStatus};

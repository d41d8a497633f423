//! Pre-flight checks on a cluster's scale-managed MachineDeployments

use ballast_common::crd::{MachineDeployment, ManagedCluster};
use ballast_common::Error;

/// Whether any deployment carries autoscaler bounds
pub fn has_scale_managed(deployments: &[MachineDeployment]) -> bool {
    deployments.iter().any(MachineDeployment::is_scale_managed)
}

/// Check min/max bounds on every scale-managed deployment.
///
/// Unannotated deployments are skipped. The first violation is returned.
pub fn validate_machine_deployments(
    cluster: &ManagedCluster,
    deployments: &[MachineDeployment],
) -> Result<(), Error> {
    for md in deployments {
        let Some(bounds) = md.scale_bounds() else {
            continue;
        };
        if bounds.min > bounds.max {
            return Err(Error::validation_for(
                cluster.key(),
                format!(
                    "machine deployment {}: min size {} is greater than max size {}",
                    md.display_name(),
                    bounds.min,
                    bounds.max
                ),
            ));
        }
        if md.has_quorum_role() && bounds.min == 0 {
            return Err(Error::validation_for(
                cluster.key(),
                format!(
                    "machine deployment {} runs control-plane or etcd and needs a min size of at least 1",
                    md.display_name()
                ),
            ));
        }
    }
    Ok(())
}

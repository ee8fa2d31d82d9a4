use anyhow::Result;
use echelon_common::Settings;
use std::sync::Arc;
use tier_api::{PermissionTier, ShellExecutor};

/// Return the executor implementing the given permission tier.
/// - Standard: tier-local::LocalExecutor
/// - Automation: tier-automation::AutomationExecutor
/// - DevicePolicy: tier-policy::PolicyExecutor
/// - Privileged: tier-ipc::PrivilegedExecutor
/// - Superuser: tier-super::SuperuserExecutor
pub fn executor_for(
    tier: PermissionTier,
    settings: &Settings,
) -> Result<Arc<dyn ShellExecutor>> {
    let executor: Arc<dyn ShellExecutor> = match tier {
        PermissionTier::Standard => Arc::new(tier_local::LocalExecutor::new(settings)),
        PermissionTier::Automation => Arc::new(tier_automation::AutomationExecutor::new()),
        PermissionTier::DevicePolicy => Arc::new(tier_policy::PolicyExecutor::new(settings)),
        PermissionTier::Privileged => Arc::new(tier_ipc::PrivilegedExecutor::new(settings)?),
        PermissionTier::Superuser => Arc::new(tier_super::SuperuserExecutor::new(settings)),
    };
    Ok(executor)
}

/// One executor per tier, in escalation order.
pub fn all_executors(settings: &Settings) -> Result<Vec<Arc<dyn ShellExecutor>>> {
    PermissionTier::ALL
        .into_iter()
        .map(|tier| executor_for(tier, settings))
        .collect()
}

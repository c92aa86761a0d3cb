//! The per-platform capability table.
//!
//! Platform-specific behavior is data, not an inheritance chain: each managed
//! platform contributes one [`PlatformFlavor`] naming its host-selection
//! strategy and the shape of its commit pipeline. A blockable whose platform
//! has no flavor configured is unsupported.

use crate::voting::hosts::{AssignedUsersSelector, HostSelector, PrimaryUserSelector};
use quorum_types::model::Platform;

static MACOS_SELECTOR: PrimaryUserSelector = PrimaryUserSelector;
static WINDOWS_SELECTOR: AssignedUsersSelector = AssignedUsersSelector;

/// Everything the ballot box needs to know about one platform.
pub struct PlatformFlavor {
    pub platform: Platform,
    /// Whether rule mutations must also enqueue a [`RuleChangeSet`] for the
    /// external commit worker.
    ///
    /// [`RuleChangeSet`]: quorum_types::model::RuleChangeSet
    pub emits_change_sets: bool,
    /// Whether package blockables exist on this platform.
    pub supports_packages: bool,
    /// Whether reset emits one REMOVE rule per affected host rather than a
    /// single global REMOVE.
    pub per_host_remove_rules: bool,
    pub selector: &'static dyn HostSelector,
}

impl PlatformFlavor {
    /// The macOS pipeline: rules are enforced by the endpoint agent directly,
    /// so they take effect the moment they are written.
    pub const fn macos() -> Self {
        Self {
            platform: Platform::MacOs,
            emits_change_sets: false,
            supports_packages: true,
            per_host_remove_rules: false,
            selector: &MACOS_SELECTOR,
        }
    }

    /// The Windows pipeline: rules only take effect once the committer has
    /// reconciled them against the external policy service.
    pub const fn windows() -> Self {
        Self {
            platform: Platform::Windows,
            emits_change_sets: true,
            supports_packages: false,
            per_host_remove_rules: true,
            selector: &WINDOWS_SELECTOR,
        }
    }

    /// The standard deployment: both platforms managed.
    pub fn standard() -> Vec<Self> {
        vec![Self::macos(), Self::windows()]
    }
}

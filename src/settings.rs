//! Settings and permission checks that gate the start of tracking.

use async_trait::async_trait;
use std::fmt;

use crate::location::TrackingPolicy;

/// Opaque token for a settings-resolution dialog the caller should show
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionHandle {
    id: u64,
    /// What the user will be asked to change
    pub description: String,
}

impl ResolutionHandle {
    pub fn new(id: u64, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Result of checking device settings against a tracking policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsOutcome {
    /// Settings already satisfy the policy
    Satisfied,
    /// The user can fix the settings through a dialog
    ResolvableViaUserDialog(ResolutionHandle),
    /// Nothing the user can do will satisfy the policy
    Unresolvable,
}

/// Checks whether device settings satisfy a tracking policy
#[async_trait]
pub trait SettingsChecker: Send + Sync {
    async fn check(&self, policy: &TrackingPolicy) -> SettingsOutcome;
}

/// Single-use reply channel for a permission prompt
pub struct PermissionResponder {
    respond: Box<dyn FnOnce(bool) + Send>,
}

impl PermissionResponder {
    pub fn new(respond: impl FnOnce(bool) + Send + 'static) -> Self {
        Self {
            respond: Box::new(respond),
        }
    }

    /// Report the user's answer. Consumes the responder so it can only answer once.
    pub fn respond(self, granted: bool) {
        (self.respond)(granted)
    }
}

impl fmt::Debug for PermissionResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionResponder").finish_non_exhaustive()
    }
}

/// Access to the fine location permission
pub trait PermissionGate: Send + Sync {
    /// Whether fine location access is already granted
    fn has_fine_location(&self) -> bool;

    /// Ask for the permission. The answer may arrive through `responder`
    /// (now or later) or through the tracker handle's permission command.
    fn request(&self, responder: PermissionResponder);
}

use studio_contracts::models::QualityTier;

use crate::error::StudioError;

/// Capabilities the hosting front-end may offer for high-tier credentials.
/// Both are optional: the defaults describe a host that offers neither.
pub trait HostEnvironment: Send + Sync {
    /// `None` when the host cannot tell.
    fn has_configured_credential(&self) -> Option<bool> {
        None
    }

    fn supports_credential_selection(&self) -> bool {
        false
    }

    /// Lets the user pick or configure a credential. Returns once the host
    /// reports completion.
    fn request_credential_selection(&self) -> Result<(), StudioError> {
        Err(StudioError::CredentialSelectionUnavailable)
    }
}

/// Host with fixed answers. Used for offline runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticHost {
    pub configured: Option<bool>,
    pub selectable: bool,
}

impl HostEnvironment for StaticHost {
    fn has_configured_credential(&self) -> Option<bool> {
        self.configured
    }

    fn supports_credential_selection(&self) -> bool {
        self.selectable
    }

    fn request_credential_selection(&self) -> Result<(), StudioError> {
        if self.selectable {
            Ok(())
        } else {
            Err(StudioError::CredentialSelectionUnavailable)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierToggle {
    /// Access was already granted; the tier switched directly.
    Selected,
    /// The host authorization flow ran and granted access.
    Authorized,
    /// The host offers no way to authorize; nothing changed.
    Unavailable,
}

/// Tracks whether the high tier is unlocked and whether it is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TierGatekeeper {
    has_high_tier_access: bool,
    high_tier_selected: bool,
}

impl TierGatekeeper {
    /// Asks the host once whether a credential is already configured.
    pub fn probe(host: &dyn HostEnvironment) -> Self {
        Self {
            has_high_tier_access: host.has_configured_credential().unwrap_or(false),
            high_tier_selected: false,
        }
    }

    pub fn has_high_tier_access(&self) -> bool {
        self.has_high_tier_access
    }

    pub fn high_tier_selected(&self) -> bool {
        self.high_tier_selected
    }

    pub fn tier(&self) -> QualityTier {
        QualityTier::from_flag(self.high_tier_selected)
    }

    pub fn select_standard(&mut self) {
        self.high_tier_selected = false;
    }

    /// Selects the high tier only if access is already held.
    pub fn try_select_high(&mut self) -> bool {
        if self.has_high_tier_access {
            self.high_tier_selected = true;
        }
        self.has_high_tier_access
    }

    /// Completion of the host authorization flow.
    pub fn grant_access(&mut self) {
        self.has_high_tier_access = true;
        self.high_tier_selected = true;
    }

    /// Forces the next high-tier toggle through the authorization flow.
    pub fn revoke_access(&mut self) {
        self.has_high_tier_access = false;
    }
}

#[cfg(test)]
mod tests {
    use studio_contracts::models::QualityTier;

    use super::{HostEnvironment, StaticHost, TierGatekeeper};
    use crate::error::StudioError;

    struct SilentHost;

    impl HostEnvironment for SilentHost {}

    #[test]
    fn probe_defaults_to_no_access_when_host_cannot_answer() {
        let gate = TierGatekeeper::probe(&SilentHost);
        assert!(!gate.has_high_tier_access());
        assert!(!gate.high_tier_selected());
        assert_eq!(gate.tier(), QualityTier::Standard);

        let configured = TierGatekeeper::probe(&StaticHost {
            configured: Some(true),
            selectable: false,
        });
        assert!(configured.has_high_tier_access());
        assert!(!configured.high_tier_selected());
    }

    #[test]
    fn silent_host_offers_no_credential_selection() {
        assert!(!SilentHost.supports_credential_selection());
        assert!(matches!(
            SilentHost.request_credential_selection(),
            Err(StudioError::CredentialSelectionUnavailable)
        ));
    }

    #[test]
    fn high_tier_needs_access_before_selection() {
        let mut gate = TierGatekeeper::probe(&SilentHost);
        assert!(!gate.try_select_high());
        assert!(!gate.high_tier_selected());
        assert_eq!(gate.tier(), QualityTier::Standard);

        gate.grant_access();
        assert!(gate.has_high_tier_access());
        assert_eq!(gate.tier(), QualityTier::High);

        gate.select_standard();
        assert_eq!(gate.tier(), QualityTier::Standard);
        assert!(gate.try_select_high());
        assert_eq!(gate.tier(), QualityTier::High);
    }

    #[test]
    fn revocation_forces_reauthorization() {
        let mut gate = TierGatekeeper::probe(&StaticHost {
            configured: Some(true),
            selectable: false,
        });
        assert!(gate.try_select_high());

        gate.revoke_access();
        assert!(!gate.has_high_tier_access());
        assert!(gate.high_tier_selected());

        gate.select_standard();
        assert!(!gate.try_select_high());
        assert!(!gate.high_tier_selected());
    }
}

use crate::types::{EngineStatus, Location, PositionMode, SvStatus};

/// Runtime-swappable session delegate.
///
/// Each method returns `true` if the policy handled the intercept itself, in
/// which case the engine skips its own default path.
pub trait SessionPolicy: Send + Sync {
    fn name(&self) -> &str {
        "default"
    }

    fn report_position(&self, location: &Location) -> bool {
        false
    }

    fn report_sv(&self, status: &SvStatus) -> bool {
        false
    }

    fn report_status(&self, status: EngineStatus) -> bool {
        false
    }

    fn set_position_mode(&self, mode: &PositionMode) -> bool {
        false
    }

    fn start_fix(&self) -> bool {
        false
    }

    fn stop_fix(&self) -> bool {
        false
    }
}

/// Declines everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPolicy;

impl SessionPolicy for DefaultPolicy {}

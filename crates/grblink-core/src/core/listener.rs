//! Position listener interface
//!
//! Defines the listener trait for position and status updates

use crate::data::{AxisPosition, ControllerStatus};
use uuid::Uuid;

/// Handle for a registered position listener.
///
/// Uniquely identifies a listener subscription. Can be used to unsubscribe
/// from position updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PositionListenerHandle(pub String);

impl PositionListenerHandle {
    /// Allocate a fresh handle
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Listener trait for position updates
///
/// Listeners run on whichever thread polled the controller, while the link
/// is still held. They must not call back into the motion interface.
pub trait PositionListener: Send + Sync {
    /// Called with the machine position from every successful status poll
    fn on_position_changed(&self, _position: &AxisPosition) {}

    /// Called with the full status snapshot
    fn on_status_changed(&self, _status: &ControllerStatus) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let a = PositionListenerHandle::generate();
        let b = PositionListenerHandle::generate();
        assert_ne!(a, b);
        assert_eq!(a.0.len(), 36);
    }
}

//! Generic motion interface
//!
//! The rest of the application drives a stage through [`MotionHal`] and
//! never sees the controller protocol underneath.

use std::sync::Arc;

use crate::core::listener::{PositionListener, PositionListenerHandle};
use crate::data::{Axis, AxisPosition};
use crate::error::Result;

/// Motion hardware abstraction
pub trait MotionHal: Send + Sync {
    /// Axes this stage can move
    fn axes(&self) -> Vec<Axis>;

    /// Run the homing cycle
    fn home(&self) -> Result<()>;

    /// Move to an absolute machine position; unspecified axes stay put
    fn move_absolute(&self, position: &AxisPosition) -> Result<()>;

    /// Move by a delta from the current position
    fn move_relative(&self, delta: &AxisPosition) -> Result<()>;

    /// Fire-and-forget jog by per-axis deltas
    fn jog(&self, deltas: &AxisPosition) -> Result<()>;

    /// Halt motion and wait until the controller is idle
    fn stop(&self) -> Result<()>;

    /// Poll the controller for its current machine position
    fn current_position(&self) -> Result<AxisPosition>;

    /// Register a listener for position updates
    fn add_position_listener(&self, listener: Arc<dyn PositionListener>) -> PositionListenerHandle;

    /// Unregister a listener; returns false if the handle was unknown
    fn remove_position_listener(&self, handle: &PositionListenerHandle) -> bool;

    /// Number of registered listeners
    fn listener_count(&self) -> usize;
}

//! [`MotionHal`] implementation backed by a GRBL controller session.

use grblink_core::{
    thread_safe_rw_map, Axis, AxisPosition, MotionHal, PositionListener, PositionListenerHandle,
    Result, ThreadSafeRwMap,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::controller::{GrblController, HomingMode, StatusCallbackId};

/// Motion adapter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Feed rate for moves, mm/min
    pub feed_rate: u32,
    /// Feed rate for jogs, mm/min
    pub jog_rate: u32,
    /// Home when the adapter is created
    pub home_on_connect: bool,
    /// Homing behaviour for [`MotionHal::home`] and `home_on_connect`
    pub homing: HomingMode,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            feed_rate: 1000,
            jog_rate: 1000,
            home_on_connect: true,
            homing: HomingMode::default(),
        }
    }
}

/// GRBL-backed motion adapter
///
/// A controller has one status callback, so only the most recently created
/// adapter on a session receives position updates. Dropping an older adapter
/// leaves the newer one attached.
pub struct GrblMotion {
    controller: Arc<GrblController>,
    callback: StatusCallbackId,
    config: MotionConfig,
    listeners: ThreadSafeRwMap<String, Arc<dyn PositionListener>>,
}

impl GrblMotion {
    /// Wrap a session, homing first if configured, and start forwarding
    /// status updates to position listeners.
    pub fn new(controller: Arc<GrblController>, config: MotionConfig) -> Result<Self> {
        if config.home_on_connect {
            let outcome = controller.home(config.homing)?;
            info!(?outcome, "Initial homing");
        }

        let listeners: ThreadSafeRwMap<String, Arc<dyn PositionListener>> = thread_safe_rw_map();
        let fanout = listeners.clone();
        let callback = controller.set_status_callback(Box::new(move |status| {
            for listener in fanout.read().values() {
                listener.on_status_changed(&status);
                listener.on_position_changed(&status.mpos);
            }
        }));

        Ok(Self {
            controller,
            callback,
            config,
            listeners,
        })
    }

    /// The underlying session
    pub fn controller(&self) -> &Arc<GrblController> {
        &self.controller
    }

    /// Adapter settings
    pub fn config(&self) -> &MotionConfig {
        &self.config
    }
}

impl MotionHal for GrblMotion {
    fn axes(&self) -> Vec<Axis> {
        Axis::ALL.to_vec()
    }

    fn home(&self) -> Result<()> {
        let outcome = self.controller.home(self.config.homing)?;
        debug!(?outcome, "Homed");
        Ok(())
    }

    fn move_absolute(&self, pos: &AxisPosition) -> Result<()> {
        self.controller
            .move_absolute(pos, self.config.feed_rate, true)
    }

    fn move_relative(&self, delta: &AxisPosition) -> Result<()> {
        self.controller
            .move_relative(delta, self.config.feed_rate, true)
    }

    fn jog(&self, deltas: &AxisPosition) -> Result<()> {
        self.controller.jog(deltas, self.config.jog_rate)
    }

    fn stop(&self) -> Result<()> {
        self.controller.stop()
    }

    fn current_position(&self) -> Result<AxisPosition> {
        self.controller.mpos()
    }

    fn add_position_listener(&self, listener: Arc<dyn PositionListener>) -> PositionListenerHandle {
        let handle = PositionListenerHandle::generate();
        self.listeners.write().insert(handle.0.clone(), listener);
        handle
    }

    fn remove_position_listener(&self, handle: &PositionListenerHandle) -> bool {
        self.listeners.write().remove(&handle.0).is_some()
    }

    fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl Drop for GrblMotion {
    fn drop(&mut self) {
        self.controller.remove_status_callback(self.callback);
    }
}

//! Controller-facing abstractions
//!
//! - [`motion`]: the generic motion interface consumed by the application
//! - [`listener`]: position/status listener registration

pub mod listener;
pub mod motion;

pub use listener::{PositionListener, PositionListenerHandle};
pub use motion::MotionHal;

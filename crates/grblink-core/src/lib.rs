//! # grblink Core
//!
//! Core types, traits, and utilities for grblink.
//! Provides the error taxonomy, the axis/position/status data model,
//! and the generic motion abstraction the application programs against.

pub mod core;
pub mod data;
pub mod error;
pub mod types;

pub use core::{MotionHal, PositionListener, PositionListenerHandle};

pub use data::{Axis, AxisPosition, ControllerStatus, MetadataRecord};

pub use error::{ConnectionError, ControllerError, Error, Result};

// Re-export type aliases for convenience
pub use types::{
    thread_safe, thread_safe_none, thread_safe_rw_map, DataCallback, ThreadSafe, ThreadSafeOption,
    ThreadSafeRwMap,
};

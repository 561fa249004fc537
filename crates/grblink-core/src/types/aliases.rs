//! Type aliases for commonly used complex types.
//!
//! This module provides type aliases to improve code readability by giving
//! meaningful names to complex nested types used across the driver crates.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use grblink_core::types::*;
//!
//! // Instead of: Arc<Mutex<SimulatorState>>
//! let state: ThreadSafe<SimulatorState> = thread_safe(SimulatorState::default());
//! ```

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

// =============================================================================
// THREAD-SAFE SHARED TYPES (Arc<Mutex<T>> / Arc<RwLock<T>>)
// =============================================================================

/// A thread-safe, mutex-protected wrapper for cross-thread sharing.
///
/// Uses `parking_lot::Mutex` for better performance than `std::sync::Mutex`.
pub type ThreadSafe<T> = Arc<Mutex<T>>;

/// A thread-safe optional wrapper for lazily-initialized cross-thread state.
pub type ThreadSafeOption<T> = Arc<Mutex<Option<T>>>;

/// A thread-safe reader-writer hash map.
pub type ThreadSafeRwMap<K, V> = Arc<RwLock<HashMap<K, V>>>;

// =============================================================================
// CALLBACK TYPES
// =============================================================================

/// A callback that receives a single parameter.
///
/// Thread-safe, suitable for cross-thread data notification.
pub type DataCallback<T> = Box<dyn Fn(T) + Send + Sync>;

// =============================================================================
// CONSTRUCTOR HELPERS
// =============================================================================

/// Create a new `ThreadSafe<T>` from a value.
#[inline]
pub fn thread_safe<T>(value: T) -> ThreadSafe<T> {
    Arc::new(Mutex::new(value))
}

/// Create a new `ThreadSafeOption<T>` initialized to `None`.
#[inline]
pub fn thread_safe_none<T>() -> ThreadSafeOption<T> {
    Arc::new(Mutex::new(None))
}

/// Create a new empty `ThreadSafeRwMap<K, V>`.
#[inline]
pub fn thread_safe_rw_map<K, V>() -> ThreadSafeRwMap<K, V> {
    Arc::new(RwLock::new(HashMap::new()))
}

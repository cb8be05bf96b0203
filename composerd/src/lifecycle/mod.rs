//! Engine session lifecycle
//!
//! Engine access is legal only while the lifecycle is `Ready`. State is a hot
//! value: observers get the current state immediately, then every transition
//! in order.

mod controller;

pub use controller::{BootstrapFailure, LifecycleController, LifecycleObserver, LifecycleState};

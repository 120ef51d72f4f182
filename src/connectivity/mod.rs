//! Connectivity tracking and reconnect notifications.

pub mod monitor;

pub use monitor::{ConnectivityMonitor, ConnectivityProbe, SubscriptionId, Transition, TransitionHandler};

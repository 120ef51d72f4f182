//! Failure handling shared by storage and transport.

pub mod retry;

//! Core types for the lifecycle kernel.

pub mod atom;
pub mod geometry;
pub mod event;

pub use atom::{AtomRecord, AtomStatus, StatusCodeError};
pub use geometry::{Anchor, Envelope, Thread, Portal};
pub use event::AtomEvent;

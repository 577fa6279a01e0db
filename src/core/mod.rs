//! Adapter internals
//!
//! Bottom-up: [`time`], [`path`] and [`flags`] are plain helpers; [`backend`]
//! is the host surface; [`bridge`] runs a host or arbiter on its own thread;
//! [`lock`] and [`shm`] hold cross-connection state, owned by the
//! [`arbiter`]; [`vfs`] is what the engine sees.

pub mod arbiter;
pub mod backend;
pub mod bridge;
pub mod flags;
pub mod lock;
pub mod path;
pub mod shm;
pub mod time;
pub mod vfs;

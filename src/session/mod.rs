// SPDX-License-Identifier: GPL-3.0-only

//! Reconstruction sessions
//!
//! A session is created from a session-init handshake and owns the point
//! cloud, pyramid levels, canvas and anchor colors of one client. It is
//! dropped with its connection.

mod config;
mod reconstruction;

pub use config::SessionConfig;
pub use reconstruction::{ReconstructionSession, SessionState};

// SPDX-License-Identifier: GPL-3.0-only

//! Keyframe service
//!
//! [`MessageHandler`] turns inbound messages into replies for one
//! connection; [`server`] carries them over TCP.

mod envmap;
mod handler;
mod recorder;
mod replay;
pub mod server;

pub use envmap::{encode_environment_map_jpeg, environment_map_rgb, roll_columns};
pub use handler::{Message, MessageHandler, ServiceContext};
pub use recorder::{SessionRecorder, recorded_messages};
pub use replay::{ReplaySummary, replay_recording};
pub use server::serve;

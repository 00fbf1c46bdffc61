// SPDX-License-Identifier: GPL-3.0-only

//! Keyframe wire protocol
//!
//! Inbound packages (client → server):
//! - `0x00` session init
//! - `0x10` near-field keyframe (depth + dense color)
//! - `0x11` far-field keyframe (orientation + sparse color)
//!
//! Outbound replies (server → client):
//! - `0x01` + UTF-8 session id
//! - `0x10` + JPEG environment map

mod ambient;
mod packages;

pub use ambient::{AmbientInfo, blackbody_rgb};
pub use packages::{
    FAR_FIELD_KEYFRAME_ID, FarFieldKeyframe, KeyframeSizes, NEAR_FIELD_KEYFRAME_ID,
    NearFieldKeyframe, Package, SESSION_INIT_ID, SessionInitPackage, decode_package,
};

/// Reply identifier acknowledging a session init
pub const SESSION_ACK_ID: u8 = 0b0000_0001;
/// Reply identifier carrying an encoded environment map
pub const ENVIRONMENT_MAP_ID: u8 = 0b0001_0000;

/// Build the `0x01` session acknowledgement
pub fn encode_session_ack(session_id: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + session_id.len());
    out.push(SESSION_ACK_ID);
    out.extend_from_slice(session_id.as_bytes());
    out
}

/// Build the `0x10` environment map reply around already-encoded image bytes
pub fn encode_environment_map(image_bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + image_bytes.len());
    out.push(ENVIRONMENT_MAP_ID);
    out.extend_from_slice(image_bytes);
    out
}

// SPDX-License-Identifier: GPL-3.0-only

//! Offline replay of a recorded connection

use std::path::Path;

use tracing::{info, warn};

use super::recorder::recorded_messages;
use super::{Message, MessageHandler, ServiceContext};
use crate::errors::{AppError, AppResult};
use crate::export::{write_anchors_las, write_envmap_png, write_point_cloud_las};

/// Outcome of a replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub messages: usize,
    pub replies: usize,
}

/// Feed every `<n>.bin` of `dir` through a fresh handler and write the final
/// environment map to `output`.
///
/// With `las_dir` set, the final point cloud and anchors are also dumped there
/// as `point_cloud.las` and `anchors.las`.
pub fn replay_recording(
    dir: &Path,
    context: ServiceContext,
    output: &Path,
    las_dir: Option<&Path>,
) -> AppResult<ReplaySummary> {
    let messages = recorded_messages(dir)?;
    info!(path = %dir.display(), messages = messages.len(), "Replaying recording");

    let mut handler = MessageHandler::without_recording(context);
    let mut replies = 0;
    for path in &messages {
        let bytes = std::fs::read(path)?;
        if handler.handle(Message::Binary(bytes)).is_some() {
            replies += 1;
        }
    }

    let session = handler
        .session()
        .ok_or_else(|| AppError::Other("Recording never initialized a session".to_string()))?;
    write_envmap_png(output, session.canvas())?;

    if let Some(las_dir) = las_dir {
        std::fs::create_dir_all(las_dir)?;
        let cloud = session.point_cloud();
        // A far-field-only recording has no near-field points
        if let Err(e) = write_point_cloud_las(&las_dir.join("point_cloud.las"), &cloud.xyz, &cloud.rgb) {
            warn!(error = %e, "Point cloud not exported");
        }
        write_anchors_las(&las_dir.join("anchors.las"), session.network(), session.anchors())?;
    }
    info!(
        output = %output.display(),
        keyframes = session.keyframe_count(),
        "Replay finished"
    );

    Ok(ReplaySummary {
        messages: messages.len(),
        replies,
    })
}

// SPDX-License-Identifier: GPL-3.0-only

//! Per-connection session recording
//!
//! Layout of one recording directory:
//! - `<n>.bin`: the n-th inbound binary message, verbatim
//! - `<elapsed_ms>_envmap.png`: every environment map produced

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::info;

use crate::errors::AppResult;
use crate::export::write_envmap_png;
use crate::pipelines::Canvas;

pub struct SessionRecorder {
    dir: PathBuf,
    started: Instant,
    messages: usize,
}

impl SessionRecorder {
    /// Create a fresh timestamped directory under `root`
    pub fn create(root: &Path) -> AppResult<Self> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        let mut dir = root.join(stamp.to_string());
        let mut suffix = 1;
        while dir.exists() {
            dir = root.join(format!("{}_{}", stamp, suffix));
            suffix += 1;
        }
        std::fs::create_dir_all(&dir)?;
        info!(path = %dir.display(), "Recording session");
        Ok(Self {
            dir,
            started: Instant::now(),
            messages: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_message(&mut self, bytes: &[u8]) -> AppResult<()> {
        let path = self.dir.join(format!("{}.bin", self.messages));
        std::fs::write(path, bytes)?;
        self.messages += 1;
        Ok(())
    }

    pub fn record_envmap(&self, canvas: &Canvas) -> AppResult<()> {
        let elapsed = self.started.elapsed().as_millis();
        write_envmap_png(&self.dir.join(format!("{}_envmap.png", elapsed)), canvas)
    }
}

/// Recorded messages of `dir` in arrival order
pub fn recorded_messages(dir: &Path) -> AppResult<Vec<PathBuf>> {
    let mut numbered: Vec<(u64, PathBuf)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "bin"))
        .filter_map(|path| {
            let n = path.file_stem()?.to_str()?.parse::<u64>().ok()?;
            Some((n, path))
        })
        .collect();
    numbered.sort_by_key(|(n, _)| *n);
    Ok(numbered.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageSize;

    #[test]
    fn test_messages_are_numbered_in_order() {
        let root = std::env::temp_dir().join(format!("envlight-rec-{}", uuid::Uuid::new_v4()));
        let mut recorder = SessionRecorder::create(&root).unwrap();
        for i in 0..12u8 {
            recorder.record_message(&[i]).unwrap();
        }
        recorder
            .record_envmap(&Canvas::new(ImageSize::new(4, 2)))
            .unwrap();

        let messages = recorded_messages(recorder.dir()).unwrap();
        assert_eq!(messages.len(), 12);
        // Numeric, not lexicographic, order
        assert_eq!(std::fs::read(&messages[10]).unwrap(), vec![10]);

        let pngs = std::fs::read_dir(recorder.dir())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.file_name().to_string_lossy().ends_with("_envmap.png"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(pngs, 1);
        std::fs::remove_dir_all(root).ok();
    }
}

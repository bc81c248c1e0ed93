use crate::service::FrameSource;
use anyhow::Context;
use preprocess::{Frame, PixelFormat};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Replays the still images of a directory as frames, in file name order.
pub struct DirectoryFrameSource {
    files: Vec<PathBuf>,
    next: usize,
    interval: Duration,
    last_frame: Option<Instant>,
}

impl DirectoryFrameSource {
    pub fn open(dir: impl AsRef<Path>, interval: Duration) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read frame directory {}", dir.display()))?
        {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if path.is_file() && is_image {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            tracing::warn!(dir = %dir.display(), "No images found in frame directory");
        } else {
            tracing::info!(dir = %dir.display(), frames = files.len(), "Frame directory opened");
        }

        Ok(Self {
            files,
            next: 0,
            interval,
            last_frame: None,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_frame {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                thread::sleep(self.interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());
    }
}

impl FrameSource for DirectoryFrameSource {
    fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        while let Some(path) = self.files.get(self.next).cloned() {
            self.next += 1;

            // An unreadable file is skipped like a dropped camera frame
            let image = match image::open(&path) {
                Ok(image) => image.to_rgb8(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping undecodable image");
                    continue;
                }
            };

            self.pace();
            let (width, height) = image.dimensions();
            tracing::trace!(path = %path.display(), width, height, "Frame read");
            return Ok(Some(Frame::new(
                image.into_raw(),
                width,
                height,
                PixelFormat::Rgb8,
            )));
        }

        Ok(None)
    }
}

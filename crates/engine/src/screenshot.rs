//! Per-test screenshots with graceful fallbacks

use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use autoqa_common::TestStatus;

use crate::browser::PageDriver;
use crate::error::{tolerate, EngineResult};

const PLACEHOLDER_WIDTH: u32 = 320;
const PLACEHOLDER_HEIGHT: u32 = 180;

/// Which capture produced a screenshot file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    FullPage,
    Viewport,
    Placeholder,
}

/// Writes `NNN_status.png` files under `<output>/<run_id>/screenshots`
#[derive(Debug, Clone)]
pub struct ScreenshotStore {
    dir: PathBuf,
}

impl ScreenshotStore {
    pub fn new(output_dir: &Path, run_id: &str) -> Self {
        Self {
            dir: output_dir.join(run_id).join("screenshots"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Capture the page after test `index`.
    ///
    /// Falls back from full page to viewport to a generated placeholder.
    /// Returns `Ok(None)` only when not even the placeholder could be written.
    pub async fn capture(
        &self,
        page: &dyn PageDriver,
        index: usize,
        status: TestStatus,
    ) -> EngineResult<Option<(PathBuf, CaptureSource)>> {
        let path = self.dir.join(format!("{:03}_{}.png", index, status));
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!("Cannot create screenshot directory {}: {}", self.dir.display(), e);
            return Ok(None);
        }

        let captured = match tolerate("full page screenshot", page.screenshot(true).await)? {
            Some(bytes) => Some((bytes, CaptureSource::FullPage)),
            None => tolerate("viewport screenshot", page.screenshot(false).await)?
                .map(|bytes| (bytes, CaptureSource::Viewport)),
        };

        if let Some((bytes, source)) = captured {
            match tokio::fs::write(&path, bytes).await {
                Ok(()) => {
                    debug!(path = %path.display(), ?source, "Screenshot saved");
                    return Ok(Some((path, source)));
                }
                Err(e) => warn!("Failed to write screenshot {}: {}", path.display(), e),
            }
        }

        match write_placeholder(&path, status) {
            Ok(()) => Ok(Some((path, CaptureSource::Placeholder))),
            Err(e) => {
                warn!("Failed to write placeholder screenshot: {}", e);
                Ok(None)
            }
        }
    }
}

fn status_color(status: TestStatus) -> Rgba<u8> {
    match status {
        TestStatus::Passed => Rgba([34, 197, 94, 255]),
        TestStatus::Failed => Rgba([239, 68, 68, 255]),
        TestStatus::Skipped => Rgba([148, 163, 184, 255]),
    }
}

/// Solid status-coloured image with a darker border
pub fn write_placeholder(path: &Path, status: TestStatus) -> EngineResult<()> {
    let fill = status_color(status);
    let border = Rgba([fill[0] / 2, fill[1] / 2, fill[2] / 2, 255]);
    let img = RgbaImage::from_fn(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, |x, y| {
        let edge = x < 4 || y < 4 || x >= PLACEHOLDER_WIDTH - 4 || y >= PLACEHOLDER_HEIGHT - 4;
        if edge {
            border
        } else {
            fill
        }
    });
    img.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::MockPage;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_capture_prefers_full_page() {
        let tmp = TempDir::new().unwrap();
        let store = ScreenshotStore::new(tmp.path(), "run-1");
        let page = MockPage::new("https://app.example.com");

        let (path, source) = store.capture(&page, 4, TestStatus::Passed).await.unwrap().unwrap();
        assert_eq!(source, CaptureSource::FullPage);
        assert!(path.ends_with("run-1/screenshots/004_passed.png"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_capture_falls_back_to_placeholder() {
        let tmp = TempDir::new().unwrap();
        let store = ScreenshotStore::new(tmp.path(), "run-2");
        let page = MockPage::new("https://app.example.com").failing_screenshots();

        let (path, source) = store.capture(&page, 0, TestStatus::Failed).await.unwrap().unwrap();
        assert_eq!(source, CaptureSource::Placeholder);

        let img = image::open(&path).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT));
        assert_eq!(*img.get_pixel(100, 100), status_color(TestStatus::Failed));
    }
}

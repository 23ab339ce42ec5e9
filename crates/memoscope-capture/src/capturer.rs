//! `DisplayCapturer` abstracts platform-specific screen-grab and
//! active-window primitives (`1`: out of scope; `4.C`). A test/in-memory
//! implementation is sufficient to exercise the rest of the Capture Loop.
//! Shaped like the corpus's `ImageSource` trait in the photoframe example:
//! `#[async_trait]`, `Send + Sync`, a default `stats()`-style accessor.

use async_trait::async_trait;
use image::RgbImage;

use crate::error::Result;

/// A stable per-display identifier plus its last-known human-readable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayId {
    pub id: String,
    pub name: String,
}

/// The active application and window title at the moment of capture (`4.C`
/// step 1b).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveContext {
    pub active_app: String,
    pub active_window: String,
}

#[async_trait]
pub trait DisplayCapturer: Send + Sync {
    /// Enumerates currently active displays.
    async fn list_displays(&self) -> Result<Vec<DisplayId>>;

    /// Captures one display's pixels, already downscaled to RGB (`4.C` step
    /// 3: "capture raw pixels -> downscale to RGB").
    async fn capture(&self, display: &DisplayId) -> Result<RgbImage>;

    /// The active application/window at capture time.
    async fn active_context(&self) -> Result<ActiveContext>;

    /// Whether the session is currently locked (`4.C` step 2: "If the
    /// session is locked, skip").
    async fn is_locked(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Deterministic noise-seeded frame generator used by property tests and
/// the dedup end-to-end scenario (`8`, scenario 1). Each call to `capture`
/// with the same `frame_seed` produces pixel-identical output, so pHash
/// dedup can be exercised without a real display.
pub struct SyntheticCapturer {
    displays: Vec<DisplayId>,
    width: u32,
    height: u32,
    frame_seed: std::sync::Mutex<u64>,
    locked: std::sync::atomic::AtomicBool,
}

impl SyntheticCapturer {
    pub fn new(displays: Vec<DisplayId>, width: u32, height: u32) -> Self {
        Self {
            displays,
            width,
            height,
            frame_seed: std::sync::Mutex::new(1),
            locked: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Advances the generator to the next frame (used by tests that want a
    /// genuinely different scene, as opposed to re-capturing the same
    /// frame to exercise dedup).
    pub fn advance_frame(&self) {
        let mut seed = self.frame_seed.lock().unwrap();
        *seed = seed.wrapping_add(1);
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, std::sync::atomic::Ordering::SeqCst);
    }

    fn render(&self, seed: u64) -> RgbImage {
        let mut img = RgbImage::new(self.width, self.height);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            let v = ((x as u64).wrapping_mul(31).wrapping_add((y as u64).wrapping_mul(17)).wrapping_add(seed)) % 256;
            *pixel = image::Rgb([v as u8, (v.wrapping_mul(7) % 256) as u8, (v.wrapping_mul(13) % 256) as u8]);
        }
        img
    }
}

#[async_trait]
impl DisplayCapturer for SyntheticCapturer {
    async fn list_displays(&self) -> Result<Vec<DisplayId>> {
        Ok(self.displays.clone())
    }

    async fn capture(&self, _display: &DisplayId) -> Result<RgbImage> {
        let seed = *self.frame_seed.lock().unwrap();
        Ok(self.render(seed))
    }

    async fn active_context(&self) -> Result<ActiveContext> {
        Ok(ActiveContext {
            active_app: "TestApp".to_string(),
            active_window: "Test Window".to_string(),
        })
    }

    async fn is_locked(&self) -> Result<bool> {
        Ok(self.locked.load(std::sync::atomic::Ordering::SeqCst))
    }
}

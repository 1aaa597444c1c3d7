use std::sync::Arc;

use image::RgbaImage;
use parking_lot::Mutex;

/// Width of one DS panel in pixels.
pub const LCD_WIDTH: usize = 256;
/// Height of one DS panel in pixels.
pub const LCD_HEIGHT: usize = 192;
/// Pixels in one panel.
pub const PANEL_PIXELS: usize = LCD_WIDTH * LCD_HEIGHT;
/// Pixels in a reconstructed frame, both panels.
pub const FRAME_PIXELS: usize = 2 * PANEL_PIXELS;

/// Frame buffer shared between capture workers and consumers.
///
/// Hold the lock for the whole read; workers rewrite the frame in place.
///
/// A worker takes this lock while it still holds the device, so do not call
/// into [`crate::DsCapture`] with the lock held. [`crate::DsCapture::is_open`]
/// and [`crate::DsCapture::stats`] are the exceptions.
pub type SharedFrame = Arc<Mutex<DualFrame>>;

/// Both DS screens as RGB565 samples, top panel first.
#[derive(Clone, PartialEq, Eq)]
pub struct DualFrame {
    pixels: Box<[u16]>,
    primed: bool,
}

impl DualFrame {
    pub fn new() -> Self {
        Self {
            pixels: vec![0u16; FRAME_PIXELS].into_boxed_slice(),
            primed: false,
        }
    }

    pub fn shared() -> SharedFrame {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Number of samples, always [`FRAME_PIXELS`].
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Whether a frame has been reconstructed into this buffer yet.
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    pub(crate) fn set_primed(&mut self) {
        self.primed = true;
    }

    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    pub(crate) fn pixels_mut(&mut self) -> &mut [u16] {
        &mut self.pixels
    }

    pub fn top(&self) -> &[u16] {
        &self.pixels[..PANEL_PIXELS]
    }

    pub fn bottom(&self) -> &[u16] {
        &self.pixels[PANEL_PIXELS..]
    }

    /// Raw little-endian bytes, as an encoder would take them.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels[..])
    }

    pub fn to_rgba(&self) -> Vec<u8> {
        rgb565_to_rgba(&self.pixels)
    }

    /// Both panels stacked vertically, 256x384.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let width = LCD_WIDTH as u32;
        let height = (2 * LCD_HEIGHT) as u32;
        RgbaImage::from_raw(width, height, self.to_rgba())
            .unwrap_or_else(|| RgbaImage::new(width, height))
    }
}

impl Default for DualFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DualFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualFrame")
            .field("len", &self.pixels.len())
            .field("primed", &self.primed)
            .finish()
    }
}

pub fn rgb565_to_rgba(data: &[u16]) -> Vec<u8> {
    let mut image_buffer = vec![0u8; data.len() * 4];

    for (c, out) in data.iter().zip(image_buffer.chunks_exact_mut(4)) {
        let r = (((c & 0xF800) >> 11) << 3) as u8;
        let g = (((c & 0x7E0) >> 5) << 2) as u8;
        let b = ((c & 0x1F) << 3) as u8;

        // replicate the high bits so full intensity maps to 0xff
        out[0] = r | (r >> 5);
        out[1] = g | (g >> 6);
        out[2] = b | (b >> 5);
        out[3] = 0xff;
    }

    image_buffer
}

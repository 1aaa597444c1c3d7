//! Views of the captured frame for renderers and encoders.

use std::fmt;

use image::{imageops, RgbaImage};

use crate::frame::{DualFrame, LCD_HEIGHT, LCD_WIDTH};

pub const GBA_WIDTH: u32 = 240;
pub const GBA_HEIGHT: u32 = 160;

const DS_WIDTH: u32 = LCD_WIDTH as u32;
const DS_HEIGHT: u32 = LCD_HEIGHT as u32;

/// Region of the stacked 256x384 frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenMode {
    /// Top screen above bottom screen.
    #[default]
    Vertical,
    /// Top screen left of bottom screen.
    Horizontal,
    /// GBA game on the top screen, borders cropped.
    GbaTop,
    /// GBA game on the bottom screen, borders cropped.
    GbaBottom,
}

impl ScreenMode {
    pub const ALL: [ScreenMode; 4] = [
        ScreenMode::Vertical,
        ScreenMode::Horizontal,
        ScreenMode::GbaTop,
        ScreenMode::GbaBottom,
    ];

    pub fn next(self) -> Self {
        match self {
            ScreenMode::Vertical => ScreenMode::Horizontal,
            ScreenMode::Horizontal => ScreenMode::GbaTop,
            ScreenMode::GbaTop => ScreenMode::GbaBottom,
            ScreenMode::GbaBottom => ScreenMode::Vertical,
        }
    }

    /// Parts of the frame shown, placed left to right.
    pub fn source_rects(self) -> Vec<Rect> {
        let gba_x = (DS_WIDTH - GBA_WIDTH) / 2;
        let gba_y = (DS_HEIGHT - GBA_HEIGHT) / 2;

        match self {
            ScreenMode::Vertical => vec![Rect {
                x: 0,
                y: 0,
                width: DS_WIDTH,
                height: DS_HEIGHT * 2,
            }],
            ScreenMode::Horizontal => vec![
                Rect {
                    x: 0,
                    y: 0,
                    width: DS_WIDTH,
                    height: DS_HEIGHT,
                },
                Rect {
                    x: 0,
                    y: DS_HEIGHT,
                    width: DS_WIDTH,
                    height: DS_HEIGHT,
                },
            ],
            ScreenMode::GbaTop => vec![Rect {
                x: gba_x,
                y: gba_y,
                width: GBA_WIDTH,
                height: GBA_HEIGHT,
            }],
            ScreenMode::GbaBottom => vec![Rect {
                x: gba_x,
                y: DS_HEIGHT + gba_y,
                width: GBA_WIDTH,
                height: GBA_HEIGHT,
            }],
        }
    }

    pub fn output_size(self) -> (u32, u32) {
        match self {
            ScreenMode::Vertical => (DS_WIDTH, DS_HEIGHT * 2),
            ScreenMode::Horizontal => (DS_WIDTH * 2, DS_HEIGHT),
            ScreenMode::GbaTop | ScreenMode::GbaBottom => (GBA_WIDTH, GBA_HEIGHT),
        }
    }

    pub fn window_size(self, scale: u32) -> (u32, u32) {
        let (width, height) = self.output_size();
        (width * scale, height * scale)
    }

    /// Lay out `frame` for this mode.
    pub fn compose(self, frame: &DualFrame) -> RgbaImage {
        let full = frame.to_rgba_image();
        let (width, height) = self.output_size();
        let mut out = RgbaImage::new(width, height);

        let mut x = 0i64;
        for rect in self.source_rects() {
            let part = imageops::crop_imm(&full, rect.x, rect.y, rect.width, rect.height).to_image();
            imageops::replace(&mut out, &part, x, 0);
            x += rect.width as i64;
        }

        out
    }
}

impl fmt::Display for ScreenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScreenMode::Vertical => "Vertical DS",
            ScreenMode::Horizontal => "Horizontal DS",
            ScreenMode::GbaTop => "GBA Top",
            ScreenMode::GbaBottom => "GBA Bottom",
        };
        f.write_str(name)
    }
}

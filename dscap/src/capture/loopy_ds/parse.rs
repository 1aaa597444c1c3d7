use super::protocol::FrameInfo;
use crate::frame::{DualFrame, LCD_HEIGHT, LCD_WIDTH, PANEL_PIXELS};

// A scanline is half a panel row. The device sends both panels' halves
// together, interleaved as (bottom, top) sample pairs.
const SCANLINES: usize = 2 * LCD_HEIGHT;
const SCANLINE_PIXELS: usize = LCD_WIDTH / 2;
const SCANLINE_BYTES: usize = SCANLINE_PIXELS * 2 * 2;

/// Source for the scanlines a frame didn't send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CarryOver {
    /// Keep what the previous frame left at the same position.
    #[default]
    PreviousFrame,
    /// Repeat the same half of the row above.
    PreviousLine,
}

/// Rebuild `frame` from the lines sent in `payload`.
///
/// Lines that were not sent are carried over according to `carry`. A frame
/// that was never filled before has nothing to carry, so its missing lines
/// are zeroed. Returns the number of lines taken from the payload.
pub fn reconstruct(
    payload: &[u8],
    info: &FrameInfo,
    frame: &mut DualFrame,
    carry: CarryOver,
) -> usize {
    debug_assert!(payload.len() >= SCANLINES * SCANLINE_BYTES);

    let primed = frame.is_primed();
    let (top, bottom) = frame.pixels_mut().split_at_mut(PANEL_PIXELS);

    let mut rows = payload.chunks_exact(SCANLINE_BYTES);
    let mut sent = 0;

    for line in 0..SCANLINES {
        let start = line * SCANLINE_PIXELS;
        let end = start + SCANLINE_PIXELS;

        if info.line_sent(line) {
            // payload is sized for every line, so this only runs dry on a
            // caller handing in a short buffer
            let Some(row) = rows.next() else {
                top[start..end].fill(0);
                bottom[start..end].fill(0);
                continue;
            };

            for (i, pair) in row.chunks_exact(4).enumerate() {
                bottom[start + i] = u16::from_le_bytes([pair[0], pair[1]]);
                top[start + i] = u16::from_le_bytes([pair[2], pair[3]]);
            }
            sent += 1;
            continue;
        }

        match carry {
            CarryOver::PreviousFrame if primed => {}
            CarryOver::PreviousLine if start >= LCD_WIDTH => {
                top.copy_within(start - LCD_WIDTH..end - LCD_WIDTH, start);
                bottom.copy_within(start - LCD_WIDTH..end - LCD_WIDTH, start);
            }
            _ => {
                top[start..end].fill(0);
                bottom[start..end].fill(0);
            }
        }
    }

    frame.set_primed();
    sent
}

//! Embedded 5x7 bitmap font used for watermark labels.
//!
//! Each glyph sits in a 6x8 cell: one column of spacing on the right and one
//! row below the baseline. Glyphs are scaled by an integer factor so the
//! rendered height tracks the requested font size.

/// Columns of ink per glyph
pub const GLYPH_WIDTH: u32 = 5;
/// Rows of ink per glyph, all above the baseline
pub const GLYPH_HEIGHT: u32 = 7;
/// Horizontal advance per character, spacing included
pub const CELL_WIDTH: u32 = 6;
/// Line height, including the row below the baseline
pub const CELL_HEIGHT: u32 = 8;

const FALLBACK: [u8; 7] = [
    0b11111, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11111,
];

/// Row bitmaps for `c`, most significant of the low five bits is the leftmost column
pub fn glyph(c: char) -> [u8; 7] {
    match c.to_ascii_uppercase() {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        ' ' => [0; 7],
        '.' => [0, 0, 0, 0, 0, 0b01100, 0b01100],
        ',' => [0, 0, 0, 0, 0b01100, 0b00100, 0b01000],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        '+' => [0, 0b00100, 0b00100, 0b11111, 0b00100, 0b00100, 0],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '/' => [0b00001, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b10000],
        '\'' => [0b00100, 0b00100, 0b01000, 0, 0, 0, 0],
        '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0, 0b00100],
        '?' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0, 0b00100],
        '@' => [0b01110, 0b10001, 0b10111, 0b10101, 0b10111, 0b10000, 0b01110],
        '&' => [0b01100, 0b10010, 0b10100, 0b01000, 0b10101, 0b10010, 0b01101],
        _ => FALLBACK,
    }
}

/// The embedded font at a given integer scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapFont {
    scale: u32,
}

impl BitmapFont {
    /// Largest scale whose line height fits in `font_size` pixels, never below 1
    pub fn for_size(font_size: u32) -> Self {
        Self {
            scale: (font_size / CELL_HEIGHT).max(1),
        }
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Saturates at `u32::MAX` for labels too long to measure
    pub fn text_width(&self, text: &str) -> u32 {
        u32::try_from(text.chars().count())
            .unwrap_or(u32::MAX)
            .saturating_mul(CELL_WIDTH)
            .saturating_mul(self.scale)
    }

    pub fn height(&self) -> u32 {
        CELL_HEIGHT * self.scale
    }

    /// Distance from the top of the line to the baseline
    pub fn ascent(&self) -> u32 {
        GLYPH_HEIGHT * self.scale
    }

    /// Visit every inked pixel of `text`, top-left corner at `(x, top)`, that
    /// lands inside a `width` x `height` canvas. Glyph cells entirely off the
    /// canvas are skipped without being rasterized.
    pub fn for_each_pixel(
        &self,
        text: &str,
        x: i64,
        top: i64,
        width: i64,
        height: i64,
        mut visit: impl FnMut(i64, i64),
    ) {
        let scale = i64::from(self.scale);
        let cell_width = i64::from(CELL_WIDTH) * scale;

        if top >= height || top + i64::from(self.ascent()) <= 0 {
            return;
        }

        // Cells ending at or left of column 0
        let hidden = if x < 0 { (-x / cell_width) as usize } else { 0 };

        for (index, c) in text.chars().enumerate().skip(hidden) {
            let cell_x = x + index as i64 * cell_width;
            if cell_x >= width {
                break;
            }
            for (row, bits) in glyph(c).iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                        continue;
                    }
                    let px = cell_x + i64::from(col) * scale;
                    let py = top + row as i64 * scale;
                    for dy in 0..scale {
                        for dx in 0..scale {
                            let (vx, vy) = (px + dx, py + dy);
                            if vx >= 0 && vy >= 0 && vx < width && vy < height {
                                visit(vx, vy);
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercase_shares_uppercase_glyphs() {
        assert_eq!(glyph('a'), glyph('A'));
        assert_eq!(glyph('z'), glyph('Z'));
    }

    #[test]
    fn test_unknown_characters_render_as_box() {
        assert_eq!(glyph('€'), FALLBACK);
        assert_eq!(glyph(' '), [0; 7]);
    }

    #[test]
    fn test_metrics_scale_with_font_size() {
        let small = BitmapFont::for_size(3);
        assert_eq!(small.scale(), 1);
        assert_eq!(small.height(), 8);
        assert_eq!(small.ascent(), 7);

        let large = BitmapFont::for_size(50);
        assert_eq!(large.scale(), 6);
        assert_eq!(large.text_width("Ada"), 3 * 6 * 6);
        assert_eq!(large.height(), 48);
    }

    #[test]
    fn test_pixels_stay_inside_text_box() {
        let font = BitmapFont::for_size(16);
        let width = i64::from(font.text_width("W@9"));
        let height = i64::from(font.ascent());
        let mut count = 0;
        font.for_each_pixel("W@9", 100, 50, 1000, 1000, |x, y| {
            assert!((100..100 + width).contains(&x));
            assert!((50..50 + height).contains(&y));
            count += 1;
        });
        assert!(count > 0);
    }

    #[test]
    fn test_space_has_no_ink() {
        let font = BitmapFont::for_size(8);
        let mut count = 0;
        font.for_each_pixel("   ", 0, 0, 100, 100, |_, _| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_width_saturates_for_oversized_labels() {
        let font = BitmapFont::for_size(u32::MAX);
        assert_eq!(font.text_width("ADA"), u32::MAX);
    }

    #[test]
    fn test_clips_to_canvas() {
        let font = BitmapFont::for_size(8);
        let mut count = 0;
        font.for_each_pixel("HELLO", -9, -3, 10, 4, |x, y| {
            assert!((0..10).contains(&x));
            assert!((0..4).contains(&y));
            count += 1;
        });
        assert!(count > 0);
    }

    #[test]
    fn test_long_label_only_rasterizes_visible_cells() {
        let font = BitmapFont::for_size(8);
        let label = "@".repeat(200_000);
        let x = -i64::from(font.text_width(&label)) + 60;

        let mut count = 0;
        font.for_each_pixel(&label, x, 0, 60, 8, |_, _| count += 1);

        let mut tail = 0;
        font.for_each_pixel(&"@".repeat(10), 0, 0, 60, 8, |_, _| tail += 1);
        assert_eq!(count, tail);
    }
}

use image::{GrayImage, Luma, Rgb, RgbImage};

/// Window identifier (CGWindowID on macOS, HWND on Windows)
pub type WindowId = u64;

/// Screen-coordinate bounding box of a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Region {
    pub l: i32,
    pub t: i32,
    pub r: i32,
    pub b: i32,
    pub w: i32,
    pub h: i32,
    pub cx: i32,
    pub cy: i32,
}

impl Region {
    pub fn new(l: i32, t: i32, w: i32, h: i32) -> Self {
        Self {
            l,
            t,
            r: l + w,
            b: t + h,
            w,
            h,
            cx: l + w / 2,
            cy: t + h / 2,
        }
    }

    /// True when `rect` lies fully inside this window.
    pub fn contains(&self, rect: &ScreenRect) -> bool {
        rect.left >= self.l
            && rect.top >= self.t
            && rect.left + rect.width as i32 <= self.r
            && rect.top + rect.height as i32 <= self.b
    }
}

/// Absolute display rectangle handed to the capture primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenRect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl ScreenRect {
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self { left, top, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Raw screenshot pixel data (BGRA)
#[derive(Debug, Clone)]
pub struct Capture {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
}

/// Intensity of one pixel, ITU-R 601 weights in fixed point.
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114 + 500) / 1000) as u8
}

impl Capture {
    /// Wrap a grayscale image as an opaque BGRA capture.
    pub fn from_gray(img: &GrayImage) -> Self {
        let mut data = Vec::with_capacity((img.width() * img.height() * 4) as usize);
        for p in img.pixels() {
            let v = p.0[0];
            data.extend_from_slice(&[v, v, v, 255]);
        }
        Self {
            data,
            width: img.width(),
            height: img.height(),
            bytes_per_row: img.width() * 4,
        }
    }

    fn bgr(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        let idx = (y * self.bytes_per_row + x * 4) as usize;
        let px = self.data.get(idx..idx + 3)?;
        Some((px[0], px[1], px[2]))
    }

    /// Single-channel intensity view used by the matcher.
    pub fn to_luma(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let (b, g, r) = self.bgr(x, y).unwrap_or((0, 0, 0));
            Luma([luma(r, g, b)])
        })
    }

    /// RGB view used when a capture is written to disk.
    pub fn to_rgb(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let (b, g, r) = self.bgr(x, y).unwrap_or((0, 0, 0));
            Rgb([r, g, b])
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
}

/// One synthetic input command, as recorded by the stub backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Move(i32, i32),
    ButtonDown(MouseButton),
    ButtonUp(MouseButton),
    KeyDown(String),
    KeyUp(String),
    Text(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_contains_inner_rect() {
        let win = Region::new(100, 50, 800, 600);
        assert!(win.contains(&ScreenRect::new(100, 50, 800, 600)));
        assert!(win.contains(&ScreenRect::new(340, 470, 240, 180)));
        assert!(!win.contains(&ScreenRect::new(99, 50, 10, 10)));
        assert!(!win.contains(&ScreenRect::new(800, 600, 101, 10)));
    }

    #[test]
    fn capture_luma_honours_row_padding() {
        // 2x1 pixels with 4 bytes of row padding
        let capture = Capture {
            data: vec![0, 0, 255, 255, 255, 255, 255, 255, 9, 9, 9, 9],
            width: 2,
            height: 1,
            bytes_per_row: 12,
        };
        let gray = capture.to_luma();
        assert_eq!(gray.get_pixel(0, 0).0[0], luma(255, 0, 0));
        assert_eq!(gray.get_pixel(1, 0).0[0], 255);
    }

    #[test]
    fn gray_round_trips_through_capture() {
        let img = GrayImage::from_fn(3, 2, |x, y| Luma([(x * 40 + y * 7) as u8]));
        assert_eq!(Capture::from_gray(&img).to_luma(), img);
    }
}

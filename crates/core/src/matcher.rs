//! Zero-mean normalized cross-correlation over a single-channel frame.
//!
//! Scores are clamped to [0, 1], 1.0 meaning an exact copy of the template.
//! Small searches run exhaustively. Large ones search a downsampled pyramid
//! level first and then refine exhaustively at full resolution around the
//! best coarse candidates.

use image::imageops::{self, FilterType};
use image::GrayImage;

/// Best placement of a template inside a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub confidence: f32,
    /// Top-left of the match, relative to the frame.
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl MatchResult {
    /// Center of the matched bounding box, relative to the frame.
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

#[derive(Debug, Clone)]
pub struct TemplateMatcher {
    /// Multiply-adds allowed before the pyramid kicks in.
    pub exhaustive_budget: u64,
    /// Smallest template side allowed at the coarse level.
    pub min_coarse_side: u32,
    /// Coarse candidates refined at full resolution.
    pub candidates: usize,
}

impl Default for TemplateMatcher {
    fn default() -> Self {
        Self {
            exhaustive_budget: 25_000_000,
            min_coarse_side: 8,
            candidates: 4,
        }
    }
}

/// Match with the default matcher settings.
pub fn match_template(frame: &GrayImage, template: &GrayImage) -> Option<MatchResult> {
    TemplateMatcher::default().locate(frame, template)
}

impl TemplateMatcher {
    /// Best location of `template` in `frame`, or `None` when the template
    /// is empty or larger than the frame.
    pub fn locate(&self, frame: &GrayImage, template: &GrayImage) -> Option<MatchResult> {
        let (fw, fh) = frame.dimensions();
        let (tw, th) = template.dimensions();
        if tw == 0 || th == 0 || tw > fw || th > fh {
            return None;
        }

        let field = Field::new(frame);
        let tpl = Prepared::new(template);
        let levels = self.pyramid_levels(fw, fh, tw, th);

        let (score, x, y) = if levels == 0 {
            field.best(&tpl, 0, fw - tw, 0, fh - th)
        } else {
            let f = 1u32 << levels;
            let small_frame = imageops::resize(frame, fw / f, fh / f, FilterType::Triangle);
            let small_tpl = imageops::resize(
                template,
                (tw / f).max(1),
                (th / f).max(1),
                FilterType::Triangle,
            );
            let coarse = Field::new(&small_frame);
            let coarse_tpl = Prepared::new(&small_tpl);
            let radius = (small_tpl.width().min(small_tpl.height()) / 2).max(1);

            let mut best = (0.0f32, 0u32, 0u32);
            for (_, cx, cy) in coarse.top_candidates(&coarse_tpl, self.candidates, radius) {
                let x0 = (cx * f).saturating_sub(2 * f);
                let y0 = (cy * f).saturating_sub(2 * f);
                let x1 = (cx * f + 2 * f).min(fw - tw);
                let y1 = (cy * f + 2 * f).min(fh - th);
                let found = field.best(&tpl, x0, x1, y0, y1);
                if found.0 > best.0 {
                    best = found;
                }
            }
            best
        };

        Some(MatchResult {
            confidence: score,
            x,
            y,
            width: tw,
            height: th,
        })
    }

    fn pyramid_levels(&self, fw: u32, fh: u32, tw: u32, th: u32) -> u32 {
        let positions = (fw - tw + 1) as u64 * (fh - th + 1) as u64;
        let work = positions * tw as u64 * th as u64;
        let mut levels = 0;
        // Each level divides both positions and template area by four.
        while work >> (4 * levels) > self.exhaustive_budget
            && (tw.min(th) >> (levels + 1)) >= self.min_coarse_side
        {
            levels += 1;
        }
        levels
    }
}

/// Frame pixels plus integral images of values and squared values.
struct Field {
    width: usize,
    height: usize,
    pixels: Vec<f32>,
    sum: Vec<u64>,
    sq: Vec<u64>,
}

impl Field {
    fn new(img: &GrayImage) -> Self {
        let width = img.width() as usize;
        let height = img.height() as usize;
        let stride = width + 1;
        let mut sum = vec![0u64; stride * (height + 1)];
        let mut sq = vec![0u64; stride * (height + 1)];
        let raw = img.as_raw();

        for y in 0..height {
            let mut row_sum = 0u64;
            let mut row_sq = 0u64;
            for x in 0..width {
                let v = raw[y * width + x] as u64;
                row_sum += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
                sq[(y + 1) * stride + x + 1] = sq[y * stride + x + 1] + row_sq;
            }
        }

        Self {
            width,
            height,
            pixels: raw.iter().map(|&v| v as f32).collect(),
            sum,
            sq,
        }
    }

    fn window(&self, table: &[u64], x: usize, y: usize, w: usize, h: usize) -> u64 {
        let stride = self.width + 1;
        table[(y + h) * stride + x + w] + table[y * stride + x]
            - table[y * stride + x + w]
            - table[(y + h) * stride + x]
    }

    fn score(&self, tpl: &Prepared, x: usize, y: usize) -> f32 {
        debug_assert!(x + tpl.width <= self.width && y + tpl.height <= self.height);
        let n = tpl.area() as f64;
        let s = self.window(&self.sum, x, y, tpl.width, tpl.height) as f64;
        let s2 = self.window(&self.sq, x, y, tpl.width, tpl.height) as f64;
        let var = (s2 - s * s / n).max(0.0);

        if tpl.energy <= f64::EPSILON {
            // Flat template: only a flat window of similar brightness matches.
            if var <= f64::EPSILON {
                return (1.0 - ((s / n) - tpl.mean).abs() / 255.0) as f32;
            }
            return 0.0;
        }
        if var <= f64::EPSILON {
            return 0.0;
        }

        let mut num = 0.0f64;
        for ty in 0..tpl.height {
            let start = (y + ty) * self.width + x;
            let row = &self.pixels[start..start + tpl.width];
            let trow = &tpl.values[ty * tpl.width..(ty + 1) * tpl.width];
            num += row.iter().zip(trow).map(|(a, b)| a * b).sum::<f32>() as f64;
        }

        (num / (tpl.energy * var).sqrt()).clamp(0.0, 1.0) as f32
    }

    /// Exhaustive search over the inclusive position box.
    fn best(&self, tpl: &Prepared, x0: u32, x1: u32, y0: u32, y1: u32) -> (f32, u32, u32) {
        let mut best = (-1.0f32, x0, y0);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let s = self.score(tpl, x as usize, y as usize);
                if s > best.0 {
                    best = (s, x, y);
                }
            }
        }
        (best.0.max(0.0), best.1, best.2)
    }

    /// Highest scoring positions, at least `radius` apart on either axis.
    fn top_candidates(&self, tpl: &Prepared, k: usize, radius: u32) -> Vec<(f32, u32, u32)> {
        let max_x = (self.width - tpl.width) as u32;
        let max_y = (self.height - tpl.height) as u32;
        let mut all = Vec::with_capacity(((max_x + 1) * (max_y + 1)) as usize);
        for y in 0..=max_y {
            for x in 0..=max_x {
                all.push((self.score(tpl, x as usize, y as usize), x, y));
            }
        }
        all.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut picked: Vec<(f32, u32, u32)> = Vec::with_capacity(k);
        for cand in all {
            if picked.len() == k {
                break;
            }
            let close = picked
                .iter()
                .any(|p| p.1.abs_diff(cand.1) < radius && p.2.abs_diff(cand.2) < radius);
            if !close {
                picked.push(cand);
            }
        }
        picked
    }
}

/// Template with its mean removed.
struct Prepared {
    width: usize,
    height: usize,
    values: Vec<f32>,
    mean: f64,
    energy: f64,
}

impl Prepared {
    fn new(img: &GrayImage) -> Self {
        let raw = img.as_raw();
        let n = raw.len().max(1) as f64;
        let mean = raw.iter().map(|&v| v as f64).sum::<f64>() / n;
        let values: Vec<f32> = raw.iter().map(|&v| (v as f64 - mean) as f32).collect();
        let energy = values.iter().map(|&v| (v as f64) * (v as f64)).sum();
        Self {
            width: img.width() as usize,
            height: img.height() as usize,
            values,
            mean,
            energy,
        }
    }

    fn area(&self) -> usize {
        self.width * self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Noise made of `block`-sized tiles so it survives downsampling.
    fn blocky_noise(w: u32, h: u32, block: u32, seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        let cols = w.div_ceil(block);
        let rows = h.div_ceil(block);
        let tiles: Vec<u8> = (0..cols * rows).map(|_| rng.gen()).collect();
        GrayImage::from_fn(w, h, |x, y| Luma([tiles[((y / block) * cols + x / block) as usize]]))
    }

    fn crop(img: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> GrayImage {
        imageops::crop_imm(img, x, y, w, h).to_image()
    }

    #[test]
    fn exact_copy_is_found_at_its_offset() {
        let frame = blocky_noise(200, 120, 1, 7);
        for &(x, y, w, h) in &[(0, 0, 20, 12), (57, 33, 24, 16), (176, 104, 24, 16), (90, 10, 7, 31)] {
            let tpl = crop(&frame, x, y, w, h);
            let m = match_template(&frame, &tpl).unwrap();
            assert!(m.confidence >= 0.99, "confidence {} at {:?}", m.confidence, (x, y));
            assert_eq!((m.x, m.y), (x, y));
            assert_eq!((m.width, m.height), (w, h));
        }
    }

    #[test]
    fn pasted_template_is_found_in_unrelated_frame() {
        let mut frame = blocky_noise(160, 100, 1, 1);
        let tpl = blocky_noise(30, 18, 3, 2);
        imageops::replace(&mut frame, &tpl, 71, 40);
        let m = match_template(&frame, &tpl).unwrap();
        assert_eq!((m.x, m.y), (71, 40));
        assert!(m.confidence >= 0.99);
    }

    #[test]
    fn absent_template_scores_low() {
        let frame = blocky_noise(160, 100, 1, 11);
        let tpl = blocky_noise(24, 16, 1, 12);
        let m = match_template(&frame, &tpl).unwrap();
        assert!(m.confidence < 0.6, "unexpected confidence {}", m.confidence);
    }

    #[test]
    fn score_is_monotonic_in_corruption() {
        let frame = blocky_noise(120, 80, 2, 5);
        let tpl = crop(&frame, 40, 30, 32, 20);
        let mut last = 1.01f32;
        for corrupted in [0u32, 40, 160, 400] {
            let mut noisy = frame.clone();
            let mut rng = StdRng::seed_from_u64(99);
            for _ in 0..corrupted {
                let x = 40 + rng.gen_range(0..32);
                let y = 30 + rng.gen_range(0..20);
                noisy.put_pixel(x, y, Luma([rng.gen()]));
            }
            let tpl_match = Field::new(&noisy).score(&Prepared::new(&tpl), 40, 30);
            assert!(tpl_match < last, "{} not below {}", tpl_match, last);
            last = tpl_match;
        }
    }

    #[test]
    fn uniform_rescale_preserves_location() {
        let frame = blocky_noise(240, 160, 4, 21);
        let tpl = crop(&frame, 120, 64, 48, 32);
        let half_frame = imageops::resize(&frame, 120, 80, FilterType::Triangle);
        let half_tpl = imageops::resize(&tpl, 24, 16, FilterType::Triangle);

        let m = match_template(&half_frame, &half_tpl).unwrap();
        assert!(m.x.abs_diff(60) <= 1 && m.y.abs_diff(32) <= 1, "got {:?}", (m.x, m.y));
        assert!(m.confidence > 0.9);
    }

    #[test]
    fn pyramid_search_matches_exhaustive_location() {
        let frame = blocky_noise(1280, 720, 8, 3);
        let tpl = crop(&frame, 777, 333, 64, 48);
        let matcher = TemplateMatcher::default();
        assert!(matcher.pyramid_levels(1280, 720, 64, 48) > 0);

        let m = matcher.locate(&frame, &tpl).unwrap();
        assert_eq!((m.x, m.y), (777, 333));
        assert!(m.confidence >= 0.99);
    }

    #[test]
    fn oversized_or_empty_template_yields_nothing() {
        let frame = blocky_noise(20, 20, 1, 0);
        assert!(match_template(&frame, &blocky_noise(21, 5, 1, 0)).is_none());
        assert!(match_template(&frame, &GrayImage::new(0, 0)).is_none());
    }

    #[test]
    fn flat_template_matches_flat_window() {
        let mut frame = blocky_noise(40, 40, 1, 8);
        let flat = GrayImage::from_pixel(6, 6, Luma([90]));
        imageops::replace(&mut frame, &flat, 10, 20);
        let m = match_template(&frame, &flat).unwrap();
        assert_eq!((m.x, m.y), (10, 20));
        assert!(m.confidence > 0.99);
    }

    #[test]
    fn center_of_even_sized_match() {
        let m = MatchResult { confidence: 1.0, x: 10, y: 20, width: 30, height: 16 };
        assert_eq!(m.center(), (25, 28));
    }
}

//! Template cache.
//!
//! Every `*.png` in the assets directory becomes one template keyed by its
//! file stem, converted to intensity and rescaled to the target's current
//! resolution at load time. Lookups never rescale.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};

use crate::logger;
use crate::region::ScaleFactor;
use crate::types::luma;

#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub pixels: GrayImage,
    /// Confidence a match must reach to count as found.
    pub threshold: f32,
}

impl Template {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Result of a directory load.
#[derive(Debug, Default, Clone)]
pub struct LoadReport {
    pub loaded: usize,
    pub failed: BTreeSet<String>,
}

pub struct AssetStore {
    templates: HashMap<String, Template>,
    scale: ScaleFactor,
}

impl AssetStore {
    pub fn new(scale: ScaleFactor) -> Self {
        Self { templates: HashMap::new(), scale }
    }

    /// Load every template image in `dir`, replacing the whole cache.
    ///
    /// A file that fails to decode is reported in `failed` and skipped.
    /// Only an unreadable directory is an error.
    pub fn load(&mut self, dir: &Path, threshold_for: impl Fn(&str) -> f32) -> Result<LoadReport> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("reading assets dir {}", dir.display()))?;

        let mut report = LoadReport::default();
        let mut fresh = HashMap::new();

        let mut paths: Vec<_> = entries.flatten().map(|e| e.path()).collect();
        paths.sort();

        for path in paths {
            let is_png = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
            if !path.is_file() || !is_png {
                continue;
            }
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };

            match image::open(&path) {
                Ok(img) => {
                    let pixels = self.prepare(&img.to_rgba8());
                    let threshold = threshold_for(&name);
                    logger::debug(&format!(
                        "template {} {}x{} threshold {:.2}",
                        name,
                        pixels.width(),
                        pixels.height(),
                        threshold
                    ));
                    fresh.insert(name.clone(), Template { name, pixels, threshold });
                    report.loaded += 1;
                }
                Err(e) => {
                    logger::warn(&format!("failed to load template {}: {}", path.display(), e));
                    report.failed.insert(name);
                }
            }
        }

        self.templates = fresh;
        logger::info(&format!(
            "loaded {} template(s) from {} (scale {:.3}x{:.3})",
            report.loaded,
            dir.display(),
            self.scale.x,
            self.scale.y
        ));
        Ok(report)
    }

    /// Register an in-memory template, scaled like a loaded one.
    pub fn insert(&mut self, name: &str, pixels: GrayImage, threshold: f32) {
        let pixels = self.rescale(pixels);
        self.templates.insert(
            name.to_string(),
            Template { name: name.to_string(), pixels, threshold },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// Names from `required` that are not cached, sorted.
    pub fn missing<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let set: BTreeSet<String> = required
            .into_iter()
            .filter(|name| !self.templates.contains_key(*name))
            .map(str::to_string)
            .collect();
        set.into_iter().collect()
    }

    fn prepare(&self, rgba: &image::RgbaImage) -> GrayImage {
        let gray = GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
            let p = rgba.get_pixel(x, y).0;
            Luma([luma(p[0], p[1], p[2])])
        });
        self.rescale(gray)
    }

    fn rescale(&self, gray: GrayImage) -> GrayImage {
        if self.scale.is_unity() {
            return gray;
        }
        let (w, h) = self.scale.apply(gray.width(), gray.height());
        // Triangle support widens with the shrink ratio, averaging the covered area.
        imageops::resize(&gray, w, h, FilterType::Triangle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str, w: u32, h: u32) {
        let img = RgbImage::from_fn(w, h, |x, y| Rgb([(x * 20) as u8, (y * 30) as u8, 90]));
        img.save(dir.join(name)).unwrap();
    }

    #[test]
    fn load_keys_by_stem_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "menu_entry.png", 12, 8);
        write_png(dir.path(), "item.png", 6, 6);
        std::fs::write(dir.path().join("broken.png"), b"not a png").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut store = AssetStore::new(ScaleFactor::UNITY);
        let report = store
            .load(dir.path(), |name| if name == "item" { 0.7 } else { 0.8 })
            .unwrap();

        assert_eq!(report.loaded, 2);
        assert_eq!(report.failed.iter().collect::<Vec<_>>(), vec!["broken"]);
        let item = store.get("item").unwrap();
        assert_eq!((item.width(), item.height()), (6, 6));
        assert!((item.threshold - 0.7).abs() < f32::EPSILON);
        assert!(store.get("broken").is_none());
        assert!(store.get("notes").is_none());
    }

    #[test]
    fn scale_is_applied_once_at_load() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "wide.png", 40, 20);

        let mut store = AssetStore::new(ScaleFactor { x: 0.5, y: 0.5 });
        store.load(dir.path(), |_| 0.8).unwrap();
        let t = store.get("wide").unwrap();
        assert_eq!((t.width(), t.height()), (20, 10));
    }

    #[test]
    fn reload_replaces_the_whole_cache() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write_png(first.path(), "old.png", 4, 4);
        write_png(second.path(), "new.png", 4, 4);

        let mut store = AssetStore::new(ScaleFactor::UNITY);
        store.load(first.path(), |_| 0.8).unwrap();
        store.load(second.path(), |_| 0.8).unwrap();
        assert!(store.get("old").is_none());
        assert!(store.get("new").is_some());
        assert_eq!(store.templates.len(), 1);
    }

    #[test]
    fn missing_lists_uncached_names() {
        let mut store = AssetStore::new(ScaleFactor::UNITY);
        store.insert("item", GrayImage::new(3, 3), 0.8);
        assert_eq!(store.missing(["item", "acquire", "acquire", "loading"]), vec!["acquire", "loading"]);
    }

    #[test]
    fn unreadable_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = AssetStore::new(ScaleFactor::UNITY);
        assert!(store.load(&dir.path().join("absent"), |_| 0.8).is_err());
    }
}

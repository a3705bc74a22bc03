use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use crate::extract::{ImageMap, Record};

pub const DATA_POINTS_DIR: &str = "data_points";
pub const IMAGES_DIR: &str = "images";

/// Record names become directory names; path separators are not welcome.
pub fn safe_record_name(name: &str) -> String {
    name.replace(['/', '\\'], "-")
}

/// Write one text file per data-point entry under
/// `{output}/data_points/{record}/{key}.txt`. Returns how many were written.
pub fn write_data_points(output_dir: &Path, record_name: &str, points: &Record) -> Result<usize> {
    if points.is_empty() {
        return Ok(0);
    }
    let dir = output_dir
        .join(DATA_POINTS_DIR)
        .join(safe_record_name(record_name));
    fs::create_dir_all(&dir)?;
    let mut written = 0;
    for (key, val) in points {
        let text = match val {
            Value::String(s) => s.clone(),
            Value::Null => continue,
            other => other.to_string(),
        };
        fs::write(dir.join(format!("{}.txt", safe_record_name(key))), text)?;
        written += 1;
    }
    debug!("Wrote {} data points for {}", written, record_name);
    Ok(written)
}

/// A deferred image fetch carrying enough metadata to file the bytes under
/// the right per-record, per-group directory once they arrive.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub url: String,
    pub record_dir: String,
    pub group: String,
    pub caption: Option<String>,
}

/// Turn a record's grouped image references into deferred fetch requests.
pub fn image_requests(record_name: &str, images: &ImageMap) -> Vec<ImageRequest> {
    let record_dir = safe_record_name(record_name);
    let mut requests = Vec::new();
    for (group, refs) in images.iter() {
        for image in refs {
            requests.push(ImageRequest {
                url: image.url.clone(),
                record_dir: record_dir.clone(),
                group: group.to_string(),
                caption: image.caption.clone(),
            });
        }
    }
    requests
}

impl ImageRequest {
    fn basename(&self) -> &str {
        let path = self
            .url
            .split(['?', '#'])
            .next()
            .unwrap_or(self.url.as_str());
        path.rsplit('/').next().unwrap_or(path)
    }

    /// `{output}/images/{record}/{group}/{basename}`.
    pub fn file_path(&self, output_dir: &Path) -> PathBuf {
        output_dir
            .join(IMAGES_DIR)
            .join(&self.record_dir)
            .join(safe_record_name(&self.group))
            .join(self.basename())
    }

    /// File the fetched bytes, plus a sibling `{stem}.txt` caption file when
    /// the reference carried one.
    pub fn save(&self, output_dir: &Path, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.file_path(output_dir);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, bytes)?;
        if let Some(caption) = &self.caption {
            let stem = match self.basename().rsplit_once('.') {
                Some((stem, _ext)) => stem.to_string(),
                None => self.basename().to_string(),
            };
            let caption_path = path.with_file_name(format!("{}.txt", stem));
            fs::write(caption_path, caption)?;
        }
        Ok(path)
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ImageRef;
    use serde_json::json;

    #[test]
    fn record_names_lose_path_separators() {
        assert_eq!(safe_record_name("Asus ROG G14 / 2024"), "Asus ROG G14 - 2024");
    }

    #[test]
    fn data_points_written_one_file_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut points = Record::new();
        points.insert("battery".into(), json!("Lasts 11 hours in our rundown."));
        points.insert("screen".into(), json!("OLED, 120 Hz."));
        let n = write_data_points(dir.path(), "Asus Zenbook 14", &points).unwrap();
        assert_eq!(n, 2);
        let base = dir.path().join(DATA_POINTS_DIR).join("Asus Zenbook 14");
        let battery = fs::read_to_string(base.join("battery.txt")).unwrap();
        assert_eq!(battery, "Lasts 11 hours in our rundown.");
        assert!(base.join("screen.txt").exists());
    }

    #[test]
    fn empty_data_points_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let n = write_data_points(dir.path(), "X", &Record::new()).unwrap();
        assert_eq!(n, 0);
        assert!(!dir.path().join(DATA_POINTS_DIR).exists());
    }

    #[test]
    fn requests_carry_group_and_caption_metadata() {
        let mut images = ImageMap::default();
        images.push(
            "Design",
            ImageRef {
                url: "https://example.com/wp/img/front.jpg".into(),
                caption: Some("Front view".into()),
            },
        );
        images.push(
            "Design",
            ImageRef {
                url: "https://example.com/wp/img/side.jpg?w=640".into(),
                caption: None,
            },
        );
        let reqs = image_requests("Asus Zenbook 14 / OLED", &images);
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].group, "Design");
        assert_eq!(reqs[0].record_dir, "Asus Zenbook 14 - OLED");
        assert_eq!(reqs[0].caption.as_deref(), Some("Front view"));
        assert_eq!(reqs[1].basename(), "side.jpg");
    }

    #[test]
    fn file_path_layout() {
        let req = ImageRequest {
            url: "https://example.com/a/b/photo.png".into(),
            record_dir: "Laptop".into(),
            group: "Gallery".into(),
            caption: None,
        };
        let path = req.file_path(Path::new("output"));
        assert_eq!(
            path,
            Path::new("output/images/Laptop/Gallery/photo.png")
        );
    }

    #[test]
    fn save_writes_bytes_and_caption_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let req = ImageRequest {
            url: "https://example.com/a/photo.jpg".into(),
            record_dir: "Laptop".into(),
            group: "Design".into(),
            caption: Some("Lid closed".into()),
        };
        let path = req.save(dir.path(), b"JPEGDATA").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"JPEGDATA");
        let caption = path.with_file_name("photo.txt");
        assert_eq!(fs::read_to_string(caption).unwrap(), "Lid closed");
    }
}

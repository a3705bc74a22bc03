pub mod handlers;
pub mod pros_cons;

use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{info, warn};

/// One product's flattened field-name -> value mapping for a single row.
/// Insertion order matters: it decides column-allocation order downstream.
pub type Record = serde_json::Map<String, Value>;

pub const BASE_URL: &str = "https://www.ultrabookreview.com/";
pub const SITE_NAME: &str = "ultrabookreview";

pub const PRODUCT_NAME_KEY: &str = "Product Name";
pub const SOURCE_KEY: &str = "Source";
pub const TOTAL_IMAGES_KEY: &str = "Total Images";
const PRODUCT_CATEGORY_KEY: &str = "Product Category";
const DATA_POINTS_KEY: &str = "Data Points";

/// Transient field holding the most recent section heading; the table handler
/// reads it to pick a parsing mode. Removed before the record is emitted.
pub(crate) const SECTION_KEY: &str = "__section";

/// A linked image plus the caption text that should be filed next to it.
#[derive(Debug, Clone)]
pub struct ImageRef {
    pub url: String,
    pub caption: Option<String>,
}

/// Image references grouped by the section label they appeared under.
/// Groups keep first-seen order and accumulate across blocks sharing a label.
#[derive(Debug, Clone, Default)]
pub struct ImageMap {
    groups: Vec<(String, Vec<ImageRef>)>,
}

impl ImageMap {
    pub fn push(&mut self, label: &str, image: ImageRef) {
        match self.groups.iter_mut().find(|(l, _)| l == label) {
            Some((_, refs)) => refs.push(image),
            None => self.groups.push((label.to_string(), vec![image])),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ImageRef])> {
        self.groups.iter().map(|(l, r)| (l.as_str(), r.as_slice()))
    }

    pub fn total(&self) -> usize {
        self.groups.iter().map(|(_, refs)| refs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

pub struct Extracted {
    pub record: Record,
    pub images: ImageMap,
    pub data_points: Record,
}

static HEADLINE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".headline").unwrap());
static BLOCKS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#content-area>*").unwrap());

/// Extract one review page into a flat record plus grouped image references.
/// Returns `None` for pages that are not product reviews or yield nothing.
pub fn review_page(doc: &Html, url: &str, seq: usize) -> Option<Extracted> {
    let Some(headline) = doc.select(&HEADLINE).next() else {
        warn!("Unable to find a product name on {}", url);
        return None;
    };
    let name = handlers::text_of(headline);
    let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
    let name = name.trim_matches(&['(', ' '][..]).to_string();
    if !name.to_lowercase().contains(" review ") {
        info!("Not a laptop review: {}", url);
        return None;
    }

    let mut record = Record::new();
    record.insert(SECTION_KEY.into(), Value::String("Specification".into()));
    record.insert("fetched_from".into(), Value::String(SITE_NAME.into()));
    record.insert(PRODUCT_NAME_KEY.into(), Value::String(name));
    record.insert(PRODUCT_CATEGORY_KEY.into(), Value::String(" ".into()));
    record.insert(SOURCE_KEY.into(), Value::String(url.to_string()));
    record.insert("id".into(), Value::from(seq as u64));
    record.insert(DATA_POINTS_KEY.into(), Value::Object(Record::new()));

    // Every handler whose selector matches gets a shot at the block: one
    // physical block can be a section caption and carry an image at once.
    let mut images = ImageMap::default();
    for block in doc.select(&BLOCKS) {
        for (css, selector, handler) in handlers::entries() {
            if handlers::matches_block(block, selector) {
                if let Err(e) = handler(block, &mut record, &mut images) {
                    warn!("Error parsing {} block on {}: {}", css, url, e);
                }
            }
        }
    }
    pros_cons::extract(doc, &mut record);

    record.remove(SECTION_KEY);
    let data_points = match record.remove(DATA_POINTS_KEY) {
        Some(Value::Object(points)) => points,
        _ => Record::new(),
    };

    if record.is_empty() && images.is_empty() {
        return None;
    }
    record.insert(TOTAL_IMAGES_KEY.into(), Value::from(images.total() as u64));
    Some(Extracted {
        record,
        images,
        data_points,
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Html {
        let html = std::fs::read_to_string("tests/fixtures/review.html").unwrap();
        Html::parse_document(&html)
    }

    fn extract_fixture() -> Extracted {
        review_page(&fixture(), "https://www.ultrabookreview.com/zenbook-14/", 7).unwrap()
    }

    #[test]
    fn non_review_page_is_rejected() {
        let doc = Html::parse_document(
            r#"<html><body><h1 class="headline">Best ultrabooks of 2024</h1>
               <div id="content-area"><table><tr><td>a</td><td>b</td></tr></table></div>
               </body></html>"#,
        );
        assert!(review_page(&doc, "https://example.com/roundup/", 1).is_none());
    }

    #[test]
    fn page_without_headline_is_rejected() {
        let doc = Html::parse_document("<html><body><p>nothing here</p></body></html>");
        assert!(review_page(&doc, "https://example.com/empty/", 1).is_none());
    }

    #[test]
    fn identity_fields_are_seeded() {
        let out = extract_fixture();
        assert_eq!(
            out.record[PRODUCT_NAME_KEY],
            serde_json::json!("Asus Zenbook 14 OLED review (UX3405MA model)")
        );
        assert_eq!(
            out.record[SOURCE_KEY],
            serde_json::json!("https://www.ultrabookreview.com/zenbook-14/")
        );
        assert_eq!(out.record["id"], serde_json::json!(7));
        assert_eq!(out.record["fetched_from"], serde_json::json!(SITE_NAME));
        assert!(out.record.get(SECTION_KEY).is_none());
        assert!(out.record.get(DATA_POINTS_KEY).is_none());
    }

    #[test]
    fn specification_rows_merge_into_record() {
        let out = extract_fixture();
        assert_eq!(out.record["Screen"], serde_json::json!("14.0 inch OLED"));
        assert_eq!(out.record["Weight"], serde_json::json!("1.2kg"));
    }

    #[test]
    fn performance_rows_get_game_prefix_and_fhd_gate() {
        let out = extract_fixture();
        assert_eq!(
            out.record["Game_Shadow of the Tomb Raider"],
            serde_json::json!("78 fps")
        );
        assert_eq!(out.record["Game_Far Cry 5"], serde_json::json!("86 fps"));
        // The QHD table fails the FHD gate and contributes nothing.
        assert!(out.record.get("Game_The Witcher 3").is_none());
    }

    #[test]
    fn malformed_block_does_not_abort_extraction() {
        // The fixture's second spec table has a one-cell row; fields from
        // blocks before and after it must still come through.
        let out = extract_fixture();
        assert!(out.record.contains_key("Weight"));
        assert!(out.record.contains_key("Game_Far Cry 5"));
    }

    #[test]
    fn images_group_under_current_section() {
        let out = extract_fixture();
        let groups: Vec<(&str, usize)> =
            out.images.iter().map(|(l, refs)| (l, refs.len())).collect();
        assert_eq!(
            groups,
            vec![("Design and daily use", 3), ("Keyboard and touchpad", 1)]
        );
        assert_eq!(out.record[TOTAL_IMAGES_KEY], serde_json::json!(4));
        for (_, refs) in out.images.iter() {
            for r in refs {
                assert!(r.url.starts_with(BASE_URL), "unresolved url {}", r.url);
            }
        }
    }

    #[test]
    fn caption_block_also_serves_its_image() {
        // The keyboard block is a single div holding both the h2 caption and
        // a linked image; both handlers must fire, heading first.
        let out = extract_fixture();
        let (label, refs) = out.images.iter().nth(1).unwrap();
        assert_eq!(label, "Keyboard and touchpad");
        assert!(refs[0].url.ends_with("kb-closeup.jpg"));
    }

    #[test]
    fn pros_and_cons_are_padded_to_ten() {
        let out = extract_fixture();
        assert_eq!(
            out.record["Pro_1_text"],
            serde_json::json!("Great battery life")
        );
        assert_eq!(out.record["Pro_3_text"], serde_json::json!("Light chassis"));
        for i in 4..=10 {
            assert_eq!(
                out.record[&format!("Pro_{}_text", i)],
                serde_json::Value::Null,
                "Pro_{} should be null",
                i
            );
        }
        for i in 1..=10 {
            assert!(
                out.record[&format!("Con_{}_text", i)].is_string(),
                "Con_{} should be set",
                i
            );
        }
        assert!(out.record.get("Con_11_text").is_none());
        assert!(out.record.get("Con_12_text").is_none());
    }

    #[test]
    fn image_map_accumulates_per_label_in_order() {
        let mut map = ImageMap::default();
        map.push(
            "Design",
            ImageRef {
                url: "a".into(),
                caption: None,
            },
        );
        map.push(
            "Screen",
            ImageRef {
                url: "b".into(),
                caption: None,
            },
        );
        map.push(
            "Design",
            ImageRef {
                url: "c".into(),
                caption: None,
            },
        );
        let labels: Vec<&str> = map.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["Design", "Screen"]);
        let (_, design) = map.iter().next().unwrap();
        assert_eq!(design.len(), 2);
        assert_eq!(map.total(), 3);
    }
}

use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde_json::Value;

use super::handlers::text_of;
use super::Record;

const MAX_ITEMS: usize = 10;

static RATINGS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.ratings2").unwrap());
static GOOD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.revgood li").unwrap());
static BAD: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".revbad li").unwrap());

/// Fixed-width pros/cons: always emits `Pro_1..10_text` and `Con_1..10_text`,
/// null-padded when the ratings block has fewer items, extra items dropped.
pub fn extract(doc: &Html, record: &mut Record) {
    let ratings = doc.select(&RATINGS).next();
    for (selector, prefix) in [(&*GOOD, "Pro"), (&*BAD, "Con")] {
        let items: Vec<String> = match ratings {
            Some(block) => block
                .select(selector)
                .map(|li| text_of(li).trim().to_string())
                .collect(),
            None => Vec::new(),
        };
        for i in 0..MAX_ITEMS {
            let key = format!("{}_{}_text", prefix, i + 1);
            let value = match items.get(i) {
                Some(text) if !text.is_empty() => Value::String(text.clone()),
                _ => Value::Null,
            };
            record.insert(key, value);
        }
    }
}

// ── Tests ──

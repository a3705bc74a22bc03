use std::sync::LazyLock;

use anyhow::{bail, Result};
use scraper::{ElementRef, Selector};
use serde_json::Value;

use super::{ImageMap, ImageRef, Record, BASE_URL, SECTION_KEY};

pub type Handler = fn(ElementRef, &mut Record, &mut ImageMap) -> Result<()>;

static TR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static TD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());
static H2: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2").unwrap());
static A: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());
static GALLERY_ICONS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".gallery-item>.gallery-icon").unwrap());

/// The dispatch table: evaluated in order against every content block, and
/// every pair whose selector matches runs. New block types are added by
/// appending rows here.
static DISPATCH: LazyLock<Vec<(&'static str, Selector, Handler)>> = LazyLock::new(|| {
    vec![
        (
            r#"h2[id^="a"]"#,
            Selector::parse(r#"h2[id^="a"]"#).unwrap(),
            heading as Handler,
        ),
        ("p img", Selector::parse("p img").unwrap(), main_image as Handler),
        (
            r#"div[id^="gallery-"]"#,
            Selector::parse(r#"div[id^="gallery-"]"#).unwrap(),
            gallery as Handler,
        ),
        ("table", Selector::parse("table").unwrap(), table as Handler),
    ]
});

pub fn entries() -> &'static [(&'static str, Selector, Handler)] {
    &DISPATCH
}

/// A block satisfies a selector if the block itself matches or any of its
/// descendants does (the source documents put the interesting element either
/// at the block root or one level in).
pub fn matches_block(block: ElementRef, selector: &Selector) -> bool {
    selector.matches(&block) || block.select(selector).next().is_some()
}

pub fn text_of(el: ElementRef) -> String {
    el.text().collect()
}

fn self_or_descendant<'a>(el: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    if selector.matches(&el) {
        return Some(el);
    }
    el.select(selector).next()
}

fn current_section(record: &Record) -> String {
    record
        .get(SECTION_KEY)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Section caption: remembered so the table and image handlers know what
/// they are looking at.
fn heading(block: ElementRef, record: &mut Record, _images: &mut ImageMap) -> Result<()> {
    let Some(h2) = self_or_descendant(block, &H2) else {
        bail!("caption block has no heading element");
    };
    record.insert(SECTION_KEY.into(), Value::String(text_of(h2)));
    Ok(())
}

/// Tables are parsed according to the section they appear under.
fn table(block: ElementRef, record: &mut Record, _images: &mut ImageMap) -> Result<()> {
    let section = current_section(record).to_lowercase();
    if section.contains("spec") {
        parse_specifications(block, record)
    } else if section.contains("performance") {
        parse_game_performance(block, record)
    } else {
        Ok(())
    }
}

/// `key,value` rows, header row skipped.
fn parse_specifications(block: ElementRef, record: &mut Record) -> Result<()> {
    for row in block.select(&TR).skip(1) {
        let mut cells = row.select(&TD);
        let (Some(key_cell), Some(value_cell)) = (cells.next(), cells.next()) else {
            bail!("specification row has fewer than two cells");
        };
        record.insert(text_of(key_cell), Value::String(text_of(value_cell)));
    }
    Ok(())
}

/// Benchmark rows, `Game_`-prefixed. Only full-HD result tables count; the
/// first data row announces the resolution.
fn parse_game_performance(block: ElementRef, record: &mut Record) -> Result<()> {
    let mut rows = block.select(&TR);
    let Some(first) = rows.next() else {
        bail!("performance table has no rows");
    };
    let mut cells = first.select(&TD);
    let (Some(_), Some(value_cell)) = (cells.next(), cells.next()) else {
        bail!("performance header row has fewer than two cells");
    };
    if !text_of(value_cell).contains("FHD") {
        return Ok(());
    }
    for row in rows {
        let mut cells = row.select(&TD);
        let (Some(key_cell), Some(value_cell)) = (cells.next(), cells.next()) else {
            bail!("performance row has fewer than two cells");
        };
        record.insert(
            format!("Game_{}", text_of(key_cell)),
            Value::String(text_of(value_cell)),
        );
    }
    Ok(())
}

/// First linked image in the block, filed under the current section.
fn main_image(block: ElementRef, record: &mut Record, images: &mut ImageMap) -> Result<()> {
    let section = current_section(record);
    if let Some(image) = linked_image(block) {
        images.push(&section, image);
    }
    Ok(())
}

/// Every linked thumbnail in a gallery block, filed under the current section.
fn gallery(block: ElementRef, record: &mut Record, images: &mut ImageMap) -> Result<()> {
    let section = current_section(record);
    for icon in block.select(&GALLERY_ICONS) {
        if let Some(image) = linked_image(icon) {
            images.push(&section, image);
        }
    }
    Ok(())
}

/// The first `a` in the element decides the image URL; site-relative URLs are
/// resolved against the fixed base.
fn linked_image(el: ElementRef) -> Option<ImageRef> {
    let link = self_or_descendant(el, &A)?;
    let href = link.value().attr("href")?;
    let url = if href.starts_with(BASE_URL) {
        href.to_string()
    } else {
        format!("{}{}", BASE_URL, href)
    };
    Some(ImageRef { url, caption: None })
}

// ── Tests ──

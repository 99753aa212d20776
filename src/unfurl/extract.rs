//! Open Graph / HTML preview metadata extraction.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use url::Url;

pub const MAX_TITLE_CHARS: usize = 500;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;
pub const MAX_SITE_NAME_CHARS: usize = 200;
pub const MAX_IMAGE_URL_CHARS: usize = 2000;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));

/// Preview fields pulled from a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub site_name: Option<String>,
}

/// Extract preview metadata from `html`, resolving relative image URLs
/// against `page_url`.
///
/// Never fails: anything missing or unusable comes back as `None`.
pub fn extract_metadata(html: &str, page_url: &Url) -> Metadata {
    let document = Html::parse_document(html);

    let title = meta_content(&document, "og:title").or_else(|| title_text(&document));
    let description =
        meta_content(&document, "og:description").or_else(|| meta_content(&document, "description"));
    let image_url = meta_content(&document, "og:image").and_then(|raw| resolve_image(&raw, page_url));
    let site_name = meta_content(&document, "og:site_name");

    Metadata {
        title: truncate(title, MAX_TITLE_CHARS),
        description: truncate(description, MAX_DESCRIPTION_CHARS),
        image_url: truncate(image_url, MAX_IMAGE_URL_CHARS),
        site_name: truncate(site_name, MAX_SITE_NAME_CHARS),
    }
}

/// `content` of the first `meta[property=key]`, else of `meta[name=key]`.
fn meta_content(document: &Html, key: &str) -> Option<String> {
    // 优先 property，其次 name
    let element = ["property", "name"].iter().find_map(|attr| {
        let selector = Selector::parse(&format!(r#"meta[{attr}="{key}"]"#)).ok()?;
        document.select(&selector).next()
    })?;

    element.value().attr("content").map(strip_tags).filter(|s| !s.is_empty())
}

fn title_text(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let element = document.select(&selector).next()?;
    let text = strip_tags(&element.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

fn resolve_image(raw: &str, page_url: &Url) -> Option<String> {
    if raw.starts_with("data:") {
        return None;
    }
    let resolved = page_url.join(raw).ok()?;
    if resolved.scheme() == "data" {
        return None;
    }
    Some(resolved.to_string())
}

/// Remove every `<...>` run, then trim.
pub fn strip_tags(text: &str) -> String {
    TAG.replace_all(text, "").trim().to_string()
}

fn truncate(text: Option<String>, max_chars: usize) -> Option<String> {
    // 按字符数截断
    text.map(|t| match t.char_indices().nth(max_chars) {
        Some((cut, _)) => t[..cut].to_string(),
        None => t,
    })
}

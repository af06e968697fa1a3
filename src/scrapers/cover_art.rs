//! Cover image discovery on arbitrary tracklist pages.

use scraper::{ElementRef, Html};

use super::html::{absolute_url, first_attr, selector};

const MIN_CONTENT_IMAGE_EDGE: u32 = 100;
const COVER_IMAGE_SELECTORS: [&str; 13] = [
    "img.cover",
    "img.album-cover",
    "img.artwork",
    "img.album-art",
    ".cover img",
    ".album-cover img",
    ".artwork img",
    "[class*=\"cover\"] img",
    "[class*=\"artwork\"] img",
    "img[alt*=\"cover\"]",
    "img[alt*=\"artwork\"]",
    ".tracklist-cover img",
    ".release-cover img",
];
const IMAGE_URL_MARKERS: [&str; 9] = [
    ".jpg", ".jpeg", ".png", ".webp", ".gif", "image/", "/images/", "artwork", "cover",
];
const DECORATIVE_URL_MARKERS: [&str; 6] = ["icon", "avatar", "logo", "banner", "button", "sprite"];

/// True when `url` plausibly points at an image.
pub fn is_valid_image_url(url: &str) -> bool {
    let lowered = url.trim().to_ascii_lowercase();
    if lowered.is_empty() {
        return false;
    }
    lowered.starts_with("data:image")
        || IMAGE_URL_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
}

fn image_source(element: ElementRef<'_>) -> Option<&str> {
    let attrs = element.value();
    ["src", "data-src", "content"]
        .iter()
        .filter_map(|name| attrs.attr(name))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

fn accept(page_url: &str, candidate: Option<String>) -> Option<String> {
    candidate
        .filter(|url| is_valid_image_url(url))
        .map(|url| absolute_url(page_url, &url))
}

fn has_small_dimension(element: ElementRef<'_>) -> bool {
    ["width", "height"].iter().any(|name| {
        element
            .value()
            .attr(name)
            .and_then(|value| value.trim().trim_end_matches("px").parse::<u32>().ok())
            .is_some_and(|edge| edge < MIN_CONTENT_IMAGE_EDGE)
    })
}

fn is_decorative(url: &str) -> bool {
    let lowered = url.to_ascii_lowercase();
    DECORATIVE_URL_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

fn main_content_image(document: &Html, page_url: &str) -> Option<String> {
    let containers = selector("main, article, .content, #content, .main");
    let images = selector("img");
    for container in document.select(&containers) {
        for image in container.select(&images) {
            if has_small_dimension(image) {
                continue;
            }
            let Some(src) = image_source(image) else {
                continue;
            };
            if is_decorative(src) {
                continue;
            }
            if let Some(url) = accept(page_url, Some(src.to_string())) {
                return Some(url);
            }
        }
    }
    None
}

/// Best cover image URL on the page, made absolute against `page_url`.
///
/// Social-card metadata wins over explicit cover markup, which wins over the
/// first reasonably sized image in the main content area.
pub fn find_cover_image(document: &Html, page_url: &str) -> Option<String> {
    let meta_candidates = [
        first_attr(document, "meta[property=\"og:image\"]", "content"),
        first_attr(document, "meta[name=\"twitter:image\"]", "content"),
        first_attr(document, "meta[property=\"twitter:image\"]", "content"),
        document
            .select(&selector("[itemprop=\"image\"]"))
            .find_map(image_source)
            .map(str::to_string),
    ];
    for candidate in meta_candidates {
        if let Some(url) = accept(page_url, candidate) {
            return Some(url);
        }
    }

    for css in COVER_IMAGE_SELECTORS {
        let found = document
            .select(&selector(css))
            .find_map(image_source)
            .map(str::to_string);
        if let Some(url) = accept(page_url, found) {
            return Some(url);
        }
    }

    main_content_image(document, page_url)
}

#[cfg(test)]
mod tests {
    use scraper::Html;

    use super::{find_cover_image, is_valid_image_url};

    const PAGE: &str = "https://www.mixesdb.com/w/2019-07-21_-_Set";

    #[test]
    fn test_open_graph_image_wins() {
        let html = Html::parse_document(
            "<head><meta property=\"og:image\" content=\"https://cdn.example.com/og.jpg\"></head>\
             <body><img class=\"cover\" src=\"/img/other.jpg\"></body>",
        );
        assert_eq!(
            find_cover_image(&html, PAGE),
            Some("https://cdn.example.com/og.jpg".to_string())
        );
    }

    #[test]
    fn test_cover_class_is_used_and_made_absolute() {
        let html = Html::parse_document(
            "<body><div class=\"album-cover\"><img src=\"/images/set.png\"></div></body>",
        );
        assert_eq!(
            find_cover_image(&html, PAGE),
            Some("https://www.mixesdb.com/images/set.png".to_string())
        );
    }

    #[test]
    fn test_main_content_skips_icons_and_small_images() {
        let html = Html::parse_document(
            "<body><main>\
             <img src=\"/static/logo.png\">\
             <img src=\"/uploads/thumb.jpg\" width=\"40\">\
             <img src=\"/uploads/stage.jpg\" width=\"640\">\
             </main></body>",
        );
        assert_eq!(
            find_cover_image(&html, PAGE),
            Some("https://www.mixesdb.com/uploads/stage.jpg".to_string())
        );
    }

    #[test]
    fn test_page_without_images_has_no_cover() {
        let html = Html::parse_document("<body><p>No pictures here</p></body>");
        assert_eq!(find_cover_image(&html, PAGE), None);
    }

    #[test]
    fn test_image_url_validation() {
        assert!(is_valid_image_url("https://x.com/a.JPEG"));
        assert!(is_valid_image_url("data:image/png;base64,AAAA"));
        assert!(is_valid_image_url("https://img.example.com/artwork/123"));
        assert!(!is_valid_image_url("https://example.com/page.html"));
        assert!(!is_valid_image_url(""));
    }
}

//! Channel page scraping.

use std::sync::LazyLock;

use regex::Regex;

static MOVIE_LINK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*["'][^"']*/movie/(\d+)[^"']*["'][^>]*>(.*?)</a>"#)
        .unwrap()
});
static LIVE_SPAN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<span\b[^>]*?\bclass\s*=\s*["'][^"']*(?:live|broadcasting)[^"']*["']"#)
        .unwrap()
});
static PASSWORD_INPUT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<input\b[^>]*?\btype\s*=\s*["']password["']"#).unwrap()
});
static META_TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").unwrap());
static ATTR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});
static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static NUMERIC_ENTITY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x[0-9A-Fa-f]+|[0-9]+);").unwrap());

/// What a channel page says about its current broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageScrape {
    pub live: bool,
    pub title: Option<String>,
    pub stream_id: Option<String>,
    pub thumbnail_url: Option<String>,
    /// The page asks for a broadcast password.
    pub password_required: bool,
}

/// Scrape a channel page.
///
/// The page counts as live when it links to a `/movie/<id>` page and either
/// carries a live/broadcasting badge or the link text itself says "live".
pub fn scrape(html: &str) -> PageScrape {
    let movie = MOVIE_LINK_REGEX.captures(html);
    let stream_id = movie
        .as_ref()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let live = movie.as_ref().is_some_and(|c| {
        let text = c
            .get(2)
            .map(|m| TAG_REGEX.replace_all(m.as_str(), " ").to_lowercase())
            .unwrap_or_default();
        LIVE_SPAN_REGEX.is_match(html) || text.contains("live")
    });

    let title = meta_content(html, &["og:title", "twitter:title"]);
    let thumbnail_url = meta_content(html, &["og:image", "twitter:image"]);

    PageScrape {
        live,
        title,
        stream_id,
        thumbnail_url,
        password_required: live && PASSWORD_INPUT_REGEX.is_match(html),
    }
}

/// First non-empty `content` of a `<meta>` whose `property` or `name` matches
/// one of `keys`, in key order.
fn meta_content(html: &str, keys: &[&str]) -> Option<String> {
    let metas: Vec<(String, String)> = META_TAG_REGEX
        .find_iter(html)
        .filter_map(|tag| {
            let mut key = None;
            let mut content = None;
            for attr in ATTR_REGEX.captures_iter(tag.as_str()) {
                let name = attr[1].to_ascii_lowercase();
                let value = attr
                    .get(2)
                    .or_else(|| attr.get(3))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                match name.as_str() {
                    "property" | "name" => key = Some(value.to_ascii_lowercase()),
                    "content" => content = Some(decode_entities(value).trim().to_string()),
                    _ => {}
                }
            }
            Some((key?, content?))
        })
        .collect();

    keys.iter().find_map(|wanted| {
        metas
            .iter()
            .find(|(k, v)| k == wanted && !v.is_empty())
            .map(|(_, v)| v.clone())
    })
}

fn decode_entities(input: &str) -> String {
    let numeric = NUMERIC_ENTITY_REGEX.replace_all(input, |caps: &regex::Captures<'_>| {
        let raw = &caps[1];
        let code = match raw.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => raw.parse::<u32>().ok(),
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });

    numeric
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIVE_PAGE: &str = r#"
        <html><head>
          <meta property="og:title" content="Late night &amp; chill &#x1F319;">
          <meta name="twitter:image" content="https://img.example/thumb.jpg">
        </head><body>
          <span class="tw-player-page__live-badge">LIVE</span>
          <a href="/alice/movie/812345678" class="tw-movie-link">Watch</a>
        </body></html>
    "#;

    #[test]
    fn detects_live_page_with_metadata() {
        let page = scrape(LIVE_PAGE);
        assert!(page.live);
        assert!(!page.password_required);
        assert_eq!(page.stream_id.as_deref(), Some("812345678"));
        assert_eq!(page.title.as_deref(), Some("Late night & chill \u{1F319}"));
        assert_eq!(
            page.thumbnail_url.as_deref(),
            Some("https://img.example/thumb.jpg")
        );
    }

    #[test]
    fn link_text_alone_can_mark_live() {
        let html = r#"<a href='https://twitcasting.tv/bob/movie/42'><b>Live</b> now</a>"#;
        let page = scrape(html);
        assert!(page.live);
        assert_eq!(page.stream_id.as_deref(), Some("42"));
    }

    #[test]
    fn archive_link_without_badge_is_offline() {
        let html = r#"<a href="/bob/movie/41">Previous broadcast</a>"#;
        let page = scrape(html);
        assert!(!page.live);
        assert_eq!(page.stream_id.as_deref(), Some("41"));
    }

    #[test]
    fn page_without_movie_link_is_offline() {
        let html = r#"<span class="live">LIVE</span><p>nothing here</p>"#;
        assert!(!scrape(html).live);
    }

    #[test]
    fn password_form_marks_private_stream() {
        let html = format!(r#"{LIVE_PAGE}<form><input type="password" name="password"></form>"#);
        assert!(scrape(&html).password_required);
    }

    #[test]
    fn og_title_wins_over_twitter_title() {
        let html = r#"
            <meta name="twitter:title" content="second">
            <meta content="first" property="og:title">
        "#;
        assert_eq!(meta_content(html, &["og:title", "twitter:title"]).as_deref(), Some("first"));
    }
}

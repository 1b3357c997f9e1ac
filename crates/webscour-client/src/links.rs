use scraper::{Html, Selector};
use url::Url;
use webscour_core::traits::LinkExtractor;

/// Extracts `<a href>` targets from HTML using CSS selectors.
#[derive(Debug, Clone, Default)]
pub struct HtmlLinkExtractor;

impl HtmlLinkExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl LinkExtractor for HtmlLinkExtractor {
    fn extract_links(&self, html: &str, base: &Url) -> Vec<Url> {
        let Ok(selector) = Selector::parse("a[href]") else {
            return Vec::new();
        };
        let document = Html::parse_document(html);

        document
            .select(&selector)
            .filter_map(|element| element.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty())
            .filter_map(|href| match base.join(href) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::debug!(href, error = %e, "Skipping unresolvable link");
                    None
                }
            })
            .collect()
    }
}

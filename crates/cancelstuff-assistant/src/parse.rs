//! Helpers for pulling structure out of free-form assistant text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static SUBSCRIPTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"[-•*]\s*([^($\n]+?)\s*\(\s*\$?\s*([\d][\d,]*(?:\.\d+)?)")
        .expect("subscription pattern is valid")
});

static HTML_DOCUMENT: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(?is)<!DOCTYPE html>.*</html>").expect("html pattern is valid")
});

/// A recurring charge mentioned by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub name: String,
    pub amount: f64,
}

/// Extract bullet items like `- Netflix ($15.99/mo)`.
///
/// Lines that don't follow the pattern are ignored.
pub fn parse_subscriptions(text: &str) -> Vec<Subscription> {
    SUBSCRIPTION_LINE
        .captures_iter(text)
        .filter_map(|caps| {
            let name = caps[1].trim();
            let amount = caps[2].replace(',', "").parse::<f64>().ok()?;
            (!name.is_empty()).then(|| Subscription {
                name: name.to_string(),
                amount,
            })
        })
        .collect()
}

/// The `<!DOCTYPE html> … </html>` span of `text`, or `text` itself if it
/// contains no complete document.
pub fn extract_html(text: &str) -> &str {
    HTML_DOCUMENT
        .find(text)
        .map_or(text, |m| m.as_str())
}

//! HTML input scraping.
//!
//! The session manager and the signer only need the `value` of a few
//! `<input>` elements. [`FieldExtractor`] is the seam; [`RegexExtractor`] is
//! the default and [`HtmlExtractor`] parses the document properly.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

/// Text whose presence in a page body means the server served the login form.
pub const LOGIN_MARKER: &str = "login";

/// True when `body` looks like the login form rather than a protected page.
pub fn is_login_page(body: &str) -> bool {
    body.contains(LOGIN_MARKER)
}

/// Pulls `<input>` values out of an HTML page. `None` means the field is absent.
pub trait FieldExtractor: Send + Sync {
    fn input_value_by_name(&self, html: &str, name: &str) -> Option<String>;
    fn input_value_by_id(&self, html: &str, id: &str) -> Option<String>;
}

/// Pattern-based extraction.
///
/// Matches `name="<field>"` (or `id="<field>"`) followed, inside the same
/// tag, by a `value="<value>"` attribute. Attribute names are matched in any
/// case and must start after whitespace, so `data-id` or `data-value` never
/// match. The field itself is compared exactly. Either quote style is
/// accepted. Attribute order matters: a `value` placed before the name/id is
/// not seen.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexExtractor;

impl RegexExtractor {
    pub fn new() -> Self {
        Self
    }

    fn compiled(pattern: String) -> Option<Regex> {
        let mut cache = PATTERNS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(re) = cache.get(&pattern) {
            return Some(re.clone());
        }
        let re = Regex::new(&pattern).ok()?;
        cache.insert(pattern, re.clone());
        Some(re)
    }

    fn attribute_then_value(html: &str, attribute: &str, key: &str) -> Option<String> {
        let pattern = format!(
            r#"\s(?i:{attribute})\s*=\s*['"]{}['"][^>]*?\s(?i:value)\s*=\s*['"](?P<value>[^'"]*)['"]"#,
            regex::escape(key)
        );
        let re = Self::compiled(pattern)?;
        re.captures(html)
            .and_then(|caps| caps.name("value"))
            .map(|m| html_escape::decode_html_entities(m.as_str()).into_owned())
    }
}

impl FieldExtractor for RegexExtractor {
    fn input_value_by_name(&self, html: &str, name: &str) -> Option<String> {
        Self::attribute_then_value(html, "name", name)
    }

    fn input_value_by_id(&self, html: &str, id: &str) -> Option<String> {
        Self::attribute_then_value(html, "id", id)
    }
}

/// Compiled lookup patterns, keyed by pattern source.
static PATTERNS: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// DOM-based extraction on top of `scraper`; attribute order does not matter.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlExtractor;

impl HtmlExtractor {
    pub fn new() -> Self {
        Self
    }

    fn select_value(html: &str, attribute: &str, key: &str) -> Option<String> {
        let escaped = key.replace('\\', "\\\\").replace('"', "\\\"");
        let selector = Selector::parse(&format!(r#"input[{attribute}="{escaped}"]"#)).ok()?;
        let document = Html::parse_document(html);
        document
            .select(&selector)
            .find_map(|element| element.value().attr("value"))
            .map(str::to_string)
    }
}

impl FieldExtractor for HtmlExtractor {
    fn input_value_by_name(&self, html: &str, name: &str) -> Option<String> {
        Self::select_value(html, "name", name)
    }

    fn input_value_by_id(&self, html: &str, id: &str) -> Option<String> {
        Self::select_value(html, "id", id)
    }
}

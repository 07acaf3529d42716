//! Deterministic HTML extraction: email addresses and business listings.
//!
//! Nothing here touches the network. Parsed documents never leave these
//! functions, so callers can hold results across `.await` points.

use std::fmt::Display;
use std::sync::LazyLock;

use harvest_common::{BusinessRecord, EmailSet, Field, HarvestError};
use harvest_config::MapsSelectors;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

const MAILTO_PREFIX: &str = "mailto:";
const SKIPPED_TEXT_PARENTS: [&str; 4] = ["script", "style", "noscript", "template"];

static EMAIL_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("static email regex")
});
static EMAIL_EXACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("static email regex")
});
static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static anchor selector"));

/// Whether `candidate` is exactly one address in the supported grammar.
pub fn is_email(candidate: &str) -> bool {
    EMAIL_EXACT.is_match(candidate)
}

/// Collect addresses from `mailto:` links and from the visible text.
pub fn extract_emails(html: &str) -> EmailSet {
    let document = Html::parse_document(html);
    let mut emails = EmailSet::new();

    for anchor in document.select(&ANCHORS) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        emails.extend(mailto_addresses(href));
    }

    let text = visible_text(&document);
    emails.extend(EMAIL_IN_TEXT.find_iter(&text).map(|m| m.as_str()));
    emails
}

/// Addresses named by a `mailto:` href; empty for any other link.
fn mailto_addresses(href: &str) -> Vec<String> {
    let href = href.trim();
    let Some(prefix) = href.get(..MAILTO_PREFIX.len()) else {
        return Vec::new();
    };
    if !prefix.eq_ignore_ascii_case(MAILTO_PREFIX) {
        return Vec::new();
    }
    let target = &href[MAILTO_PREFIX.len()..];
    let target = target.split('?').next().unwrap_or("");

    let decoded = urlencoding::decode(target)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| target.to_string());
    decoded
        .split(',')
        .map(str::trim)
        .filter(|candidate| is_email(candidate))
        .map(str::to_string)
        .collect()
}

/// Text nodes outside script-like elements, separated by single spaces.
fn visible_text(document: &Html) -> String {
    let mut out = String::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| SKIPPED_TEXT_PARENTS.contains(&e.name()))
        });
        if hidden {
            continue;
        }
        out.push_str(text);
        out.push(' ');
    }
    out
}

/// Field selectors compiled once per search.
#[derive(Debug, Clone)]
pub struct BusinessSelectors {
    name: Selector,
    address: Selector,
    phone: Selector,
    website: Selector,
}

impl BusinessSelectors {
    pub fn compile(config: &MapsSelectors) -> Result<Self, HarvestError> {
        Ok(Self {
            name: compile_selector("name", &config.name)?,
            address: compile_selector("address", &config.address)?,
            phone: compile_selector("phone", &config.phone)?,
            website: compile_selector("website", &config.website)?,
        })
    }
}

fn compile_selector(field: &str, css: &str) -> Result<Selector, HarvestError> {
    Selector::parse(css)
        .map_err(|e| HarvestError::InvalidInput(format!("invalid {field} selector {css:?}: {e}")))
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}

fn field(document: &Html, selector: &Selector) -> Field {
    let text = document.select(selector).next().map(|el| element_text(&el));
    Field::new(text.as_deref())
}

/// Extract one listing from the HTML showing a selected result card.
pub fn extract_business(html: &str, selectors: &BusinessSelectors) -> BusinessRecord {
    let document = Html::parse_document(html);

    // Website rows sometimes render only an icon; the link target is the value.
    let website = document.select(&selectors.website).next().map(|el| {
        let text = element_text(&el);
        if text.trim().is_empty() {
            el.value().attr("href").unwrap_or_default().to_string()
        } else {
            text
        }
    });

    BusinessRecord {
        name: field(&document, &selectors.name),
        address: field(&document, &selectors.address),
        phone: field(&document, &selectors.phone),
        website: Field::new(website.as_deref()),
    }
}

/// Records extracted from a batch of cards, plus the reasons cards were skipped.
#[derive(Debug, Default)]
pub struct BusinessBatch {
    pub records: Vec<BusinessRecord>,
    pub skipped: Vec<String>,
}

/// Fold per-card outcomes: successes become records, failures are logged
/// and recorded without aborting the batch.
pub fn extract_businesses<I, E>(cards: I, selectors: &BusinessSelectors) -> BusinessBatch
where
    I: IntoIterator<Item = Result<String, E>>,
    E: Display,
{
    cards
        .into_iter()
        .enumerate()
        .fold(BusinessBatch::default(), |mut batch, (index, card)| {
            match card {
                Ok(html) => batch.records.push(extract_business(&html, selectors)),
                Err(err) => {
                    tracing::warn!(
                        target: "harvest.extract",
                        card = index,
                        error = %err,
                        "extract.card_failed"
                    );
                    batch.skipped.push(err.to_string());
                }
            }
            batch
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailto_and_text_are_combined() {
        let html = r#"<a href="mailto:a@b.com">x</a> text with c@d.org and invalid@@x"#;
        let emails = extract_emails(html);
        let expected: EmailSet = ["a@b.com", "c@d.org"].into_iter().collect();
        assert_eq!(emails, expected);
    }

    #[test]
    fn duplicates_across_sources_collapse() {
        let html = r#"
            <p>Write to <a href="mailto:team@example.com">team@example.com</a></p>
            <footer>team@example.com</footer>
        "#;
        let emails = extract_emails(html);
        assert_eq!(emails.len(), 1);
        assert!(emails.contains("team@example.com"));
    }

    #[test]
    fn case_is_preserved_not_folded() {
        let emails = extract_emails("<p>Info@Example.com info@example.com</p>");
        assert_eq!(emails.len(), 2);
    }

    #[test]
    fn mailto_query_and_encoding_are_stripped() {
        let html = r#"
            <a href="MAILTO:sales%40shop.io?subject=Hi">Sales</a>
            <a href="mailto:one@x.com,two@y.net">Both</a>
            <a href="mailto:">Empty</a>
            <a href="https://example.com/contact">Contact</a>
        "#;
        let emails = extract_emails(html);
        let expected: EmailSet = ["sales@shop.io", "one@x.com", "two@y.net"]
            .into_iter()
            .collect();
        assert_eq!(emails, expected);
    }

    #[test]
    fn script_text_is_not_visible() {
        let html = r#"
            <head><script>var tracker = "bot@tracker.com";</script>
            <style>/* css@style.com */</style></head>
            <body><p>hello@visible.org</p></body>
        "#;
        let emails = extract_emails(html);
        let expected: EmailSet = ["hello@visible.org"].into_iter().collect();
        assert_eq!(emails, expected);
    }

    #[test]
    fn adjacent_blocks_do_not_merge() {
        let emails = extract_emails("<div>ops@site.com</div><div>Contact</div>");
        assert!(emails.contains("ops@site.com"));
        assert_eq!(emails.len(), 1);
    }

    #[test]
    fn every_result_matches_grammar() {
        let html = r#"
            <a href="mailto:not an email">x</a>
            <a href="mailto:ok@fine.co">y</a>
            <p>first.last+tag@sub.domain.museum, broken@nodot, @lonely.com, a@b.c</p>
        "#;
        let emails = extract_emails(html);
        assert!(!emails.is_empty());
        for email in emails.iter() {
            assert!(is_email(email), "{email}");
        }
        assert!(emails.contains("first.last+tag@sub.domain.museum"));
        assert!(!emails.contains("a@b.c"));
    }

    #[test]
    fn extraction_is_deterministic() {
        let html = "<p>x@y.com</p><a href='mailto:z@w.org'>z</a><p>x@y.com</p>";
        assert_eq!(extract_emails(html), extract_emails(html));
    }

    #[test]
    fn mailto_escapes_decode_to_addresses() {
        assert_eq!(mailto_addresses("mailto:a%40b.com"), vec!["a@b.com".to_string()]);
        assert_eq!(
            mailto_addresses("mailto:100%25off@deals.com"),
            vec!["100%off@deals.com".to_string()]
        );
    }

    fn selectors() -> BusinessSelectors {
        BusinessSelectors::compile(&MapsSelectors::default()).unwrap()
    }

    const FULL_CARD: &str = r#"
        <div role="main">
          <h1 class="DUwDvf">Blue Bottle Coffee</h1>
          <button data-item-id="address"><div class="Io6YTe">1 Ferry Building, San Francisco</div></button>
          <a data-item-id="authority" href="https://bluebottlecoffee.com/"><div class="Io6YTe">bluebottlecoffee.com</div></a>
          <button data-item-id="phone:tel:+14155551234"><div class="Io6YTe">(415) 555-1234</div></button>
        </div>
    "#;

    const CARD_WITHOUT_PHONE: &str = r#"
        <div role="main">
          <h1 class="DUwDvf">Sightglass</h1>
          <button data-item-id="address"><div class="Io6YTe">270 7th St</div></button>
        </div>
    "#;

    #[test]
    fn full_card_populates_every_field() {
        let record = extract_business(FULL_CARD, &selectors());
        assert_eq!(record.name.as_str(), "Blue Bottle Coffee");
        assert_eq!(record.address.as_str(), "1 Ferry Building, San Francisco");
        assert_eq!(record.phone.as_str(), "(415) 555-1234");
        assert_eq!(record.website.as_str(), "bluebottlecoffee.com");
    }

    #[test]
    fn missing_phone_becomes_not_available() {
        let record = extract_business(CARD_WITHOUT_PHONE, &selectors());
        assert_eq!(record.name.as_str(), "Sightglass");
        assert_eq!(record.phone.as_str(), "N/A");
        assert_eq!(record.website.as_str(), "N/A");
    }

    #[test]
    fn icon_only_website_uses_link_target() {
        let html = r#"
            <h1 class="DUwDvf">Ritual</h1>
            <a data-item-id="authority" href="https://ritualcoffee.com/"><span class="icon"></span></a>
        "#;
        let record = extract_business(html, &selectors());
        assert_eq!(record.website.as_str(), "https://ritualcoffee.com/");
    }

    #[test]
    fn failed_card_does_not_abort_batch() {
        let cards: Vec<Result<String, String>> = vec![
            Ok(FULL_CARD.to_string()),
            Err("card detached".to_string()),
            Ok(CARD_WITHOUT_PHONE.to_string()),
        ];
        let batch = extract_businesses(cards, &selectors());
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.skipped, vec!["card detached".to_string()]);
        assert_eq!(batch.records[1].phone.as_str(), "N/A");
    }

    #[test]
    fn invalid_selector_is_invalid_input() {
        let config = MapsSelectors {
            phone: "[[[".into(),
            ..MapsSelectors::default()
        };
        let err = BusinessSelectors::compile(&config).err().unwrap();
        assert_eq!(err.kind(), harvest_common::ErrorKind::InvalidInput);
    }
}

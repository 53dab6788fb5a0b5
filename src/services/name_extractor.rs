use std::collections::HashSet;

use itertools::Itertools;
use scraper::{Html, Selector};

/// Listing templates mark company-name anchors with different class
/// signatures; an exact class-set match keeps navigation links out.
const CANDIDATE_CLASS_SETS: &[&[&str]] = &[
    &["t-accent", "t-heavy"],
    &["txn--font-16", "txn--text-color-mine-shaft"],
    &["txn--text-color-mine-shaft"],
    &["txn--text-decoration-none", "txn--text-color-mine-shaft"],
];

const NOISE_TERMS: &[&str] = &[
    "team",
    "linkedin",
    "twitter",
    "facebook",
    "email",
    "contact",
    "overview",
    "companies",
    "company",
    "about",
];

const MAX_NAMES_PER_PAGE: usize = 20;

/// Extracts candidate company names from a listing page. Unions all class
/// signatures, drops navigation/social noise, dedups case-insensitively
/// preserving first-seen order, and caps the result. An empty vec means the
/// page simply had no recognizable listing, not a failure.
pub fn extract_candidate_names(page_html: &str) -> Vec<String> {
    let a_tag_selector = Selector::parse("a").unwrap();
    let html_document = Html::parse_document(page_html);

    let mut names: Vec<String> = vec![];
    for class_set in CANDIDATE_CLASS_SETS {
        let wanted: HashSet<&str> = class_set.iter().copied().collect();
        for tag in html_document.select(&a_tag_selector) {
            let classes: HashSet<&str> = tag.value().classes().collect();
            if classes != wanted {
                continue;
            }
            let text = tag.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                names.push(text);
            }
        }
    }

    names
        .into_iter()
        .filter(|name| {
            let lowered = name.to_lowercase();
            !NOISE_TERMS.iter().any(|term| lowered.contains(term))
        })
        .unique_by(|name| name.to_lowercase())
        .take(MAX_NAMES_PER_PAGE)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::extract_candidate_names;

    const LISTING_PAGE: &str = r#"
        <html><body>
            <a class="t-accent t-heavy">Acme Robotics</a>
            <a class="t-accent t-heavy">Meet The Team</a>
            <a class="t-accent t-heavy">acme robotics</a>
            <a class="txn--font-16 txn--text-color-mine-shaft">Beta Health</a>
            <a class="txn--text-color-mine-shaft">Gamma Labs</a>
            <a class="txn--text-decoration-none txn--text-color-mine-shaft">Delta Pay</a>
            <a class="txn--text-color-mine-shaft">LinkedIn</a>
            <a class="nav-link">Not A Company</a>
            <a class="t-accent t-heavy"> </a>
        </body></html>
    "#;

    #[test]
    fn extracts_from_all_class_signatures() {
        let names = extract_candidate_names(LISTING_PAGE);

        assert_eq!(
            names,
            vec!["Acme Robotics", "Beta Health", "Gamma Labs", "Delta Pay"]
        );
    }

    #[test]
    fn dedup_is_case_insensitive_and_order_stable() {
        let first = extract_candidate_names(LISTING_PAGE);
        let second = extract_candidate_names(LISTING_PAGE);

        assert_eq!(first, second);
        let lowered: Vec<String> = first.iter().map(|n| n.to_lowercase()).collect();
        let mut deduped = lowered.clone();
        deduped.dedup();
        assert_eq!(lowered, deduped);
        assert_eq!(first.first().map(String::as_str), Some("Acme Robotics"));
    }

    #[test]
    fn page_without_matches_yields_empty_list() {
        let names = extract_candidate_names("<html><body><a class=\"x\">Foo</a></body></html>");
        assert!(names.is_empty());
    }

    #[test]
    fn noise_terms_are_filtered() {
        let names = extract_candidate_names(LISTING_PAGE);
        assert!(!names.iter().any(|n| n.to_lowercase().contains("team")));
        assert!(!names.iter().any(|n| n.to_lowercase().contains("linkedin")));
    }
}

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tender_adapters::{find_feed_links, parse_feed, parse_tabular, scrape_listing};
use tender_core::RawFormat;

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .expect("workspace root")
}

fn fixture(rel: &str) -> String {
    let path = workspace_root().join("fixtures").join(rel);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

#[test]
fn emsd_rss_fixture() {
    let items = parse_feed(&fixture("feeds/emsd_tenders.rss.xml")).expect("rss");
    assert_eq!(items.len(), 2, "untitled corrigendum is dropped");
    assert!(items.iter().all(|i| !i.guid.is_empty()));
    assert_eq!(items[0].guid, "EMSD-T-23-2025");
    assert!(items[0].title.contains("EMSD(T)23/2025"));
    assert_eq!(items[1].pre.publish_date.as_deref(), Some("2025-01-06"));
    assert!(items[0]
        .description
        .as_deref()
        .is_some_and(|d| d.starts_with("Provision of event management")));
}

#[test]
fn atom_fixture() {
    let items = parse_feed(&fixture("feeds/gov_sg_notices.atom.xml")).expect("atom");
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.format == RawFormat::AtomXml));
    assert_eq!(
        items[1].link.as_deref(),
        Some("https://www.nparks.gov.sg/procurement/consultancy-visitor-study")
    );
    assert_eq!(items[1].published_at.as_deref(), Some("2025-01-28T02:30:00Z"));
}

#[test]
fn tabular_fixture() {
    let mut map = BTreeMap::new();
    for (field, tag) in [
        ("title", "Subject"),
        ("tender_ref", "RefNo"),
        ("publish_date", "IssueDate"),
        ("closing_date", "ClosingDate"),
        ("agency", "Department"),
        ("raw_category", "Category"),
    ] {
        map.insert(field.to_string(), tag.to_string());
    }
    let items = parse_tabular(&fixture("feeds/hktb_tenders.tabular.xml"), &map);
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].pre.tender_ref.as_deref(), Some("TB2025/014"));
    assert_eq!(items[1].pre.closing_date.as_deref(), Some("28-Feb-2025"));
    assert!(items[1].pre.raw_category.is_none());
}

#[test]
fn marketplace_listing_fixture() {
    let scrape = scrape_listing(
        &fixture("html/marketplace_listing.html"),
        "https://www.marketplace.gov.sg/opportunities",
    );
    assert!(scrape.errors.is_empty(), "{:?}", scrape.errors);
    assert_eq!(scrape.items.len(), 2);
    assert_eq!(
        scrape.items[0].pre.raw_category.as_deref(),
        Some("Advertising & Marketing")
    );
    assert_eq!(
        scrape.items[1].link.as_deref(),
        Some("https://www.marketplace.gov.sg/opportunity/STB-2025-112")
    );
}

#[test]
fn hub_fixture_links() {
    let links = find_feed_links(
        &fixture("html/hk_tenders_hub.html"),
        "https://www.tenders.gov.hk/en/directory.html",
    )
    .expect("links");
    assert_eq!(
        links,
        vec![
            "https://www.tenders.gov.hk/feed.xml".to_string(),
            "https://www.lcsd.gov.hk/en/tender/notices.rss".to_string(),
        ]
    );

    let none = find_feed_links(
        &fixture("html/hub_without_feeds.html"),
        "https://www.gov.sg/procurement",
    )
    .expect("links");
    assert!(none.is_empty());
}

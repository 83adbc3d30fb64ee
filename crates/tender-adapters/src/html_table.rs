//! Positional scraper for the one marketplace listing page that has no feed.
//!
//! Cells are read by position: title, category, agency, open date, close date.
//! A layout change on that page only ever empties this source's harvest.

use scraper::Html;
use tender_core::{identity_hash, PreExtracted, RawFormat, RawItem};
use tender_storage::Url;
use tracing::debug;

use crate::{element_text, selector, AdapterError};

/// Row classes the listing has used for tender rows.
pub const ROW_CLASS_HINTS: &[&str] = &[
    "tender-row",
    "listing-row",
    "row-odd",
    "row-even",
    "odd",
    "even",
];

const EXPECTED_CELLS: usize = 5;

/// Rows that parsed plus problems met along the way. Both may be non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableScrape {
    pub items: Vec<RawItem>,
    pub errors: Vec<String>,
}

fn row_selector_css() -> String {
    ROW_CLASS_HINTS
        .iter()
        .map(|class| format!("tr.{class}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn scrape_listing(html: &str, page_url: &str) -> TableScrape {
    scrape_rows(html, page_url).unwrap_or_else(|err| TableScrape {
        items: Vec::new(),
        errors: vec![err.to_string()],
    })
}

fn scrape_rows(html: &str, page_url: &str) -> Result<TableScrape, AdapterError> {
    let row_sel = selector(&row_selector_css())?;
    let cell_sel = selector("td")?;
    let link_sel = selector("a[href]")?;
    let base = Url::parse(page_url).ok();
    let document = Html::parse_document(html);

    let mut scrape = TableScrape::default();
    let mut matched = 0usize;
    for (index, row) in document.select(&row_sel).enumerate() {
        matched += 1;
        let cells: Vec<Option<String>> = row.select(&cell_sel).map(element_text).collect();
        let cell = |i: usize| cells.get(i).cloned().flatten();

        let Some(title) = cell(0) else {
            debug!(row = index + 1, "skipping listing row without title");
            continue;
        };
        if cells.len() < EXPECTED_CELLS {
            scrape.errors.push(format!(
                "row {}: expected {EXPECTED_CELLS} cells, found {}",
                index + 1,
                cells.len()
            ));
        }

        let agency = cell(2);
        let link = row
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| match &base {
                Some(base) => base.join(href.trim()).ok().map(|u| u.to_string()),
                None => Some(href.trim().to_string()),
            });

        let guid = identity_hash(&[&title, agency.as_deref().unwrap_or("")]);
        let pre = PreExtracted {
            title: Some(title.clone()),
            raw_category: cell(1),
            agency,
            publish_date: cell(3),
            closing_date: cell(4),
            source_url: link.clone(),
            ..PreExtracted::default()
        };
        scrape.items.push(RawItem {
            guid,
            title,
            link,
            published_at: pre.publish_date.clone(),
            description: None,
            format: RawFormat::HtmlRow,
            payload: row.html(),
            pre,
        });
    }

    if matched == 0 {
        scrape
            .errors
            .push("no rows matched the known listing row classes".to_string());
    }
    Ok(scrape)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<html><body><table>
<tr class="header"><th>Title</th><th>Category</th><th>Agency</th><th>Open</th><th>Close</th></tr>
<tr class="row-odd">
  <td><a href="/opportunity/881">Integrated  marketing
      campaign for SkillsFuture</a></td>
  <td>Advertising</td><td>SkillsFuture Singapore</td><td>02/01/2025</td><td>20/01/2025</td>
</tr>
<tr class="row-even"><td>  </td><td>Misc</td><td>Agency</td><td>01/01/2025</td><td>02/01/2025</td></tr>
<tr class="row-odd"><td>Booth fabrication</td><td>Events</td></tr>
</table></body></html>"#;

    #[test]
    fn rows_are_read_positionally() {
        let scrape = scrape_listing(LISTING, "https://www.marketplace.gov.sg/listing");
        assert_eq!(scrape.items.len(), 2);

        let first = &scrape.items[0];
        assert_eq!(first.title, "Integrated marketing campaign for SkillsFuture");
        assert_eq!(first.pre.agency.as_deref(), Some("SkillsFuture Singapore"));
        assert_eq!(first.pre.raw_category.as_deref(), Some("Advertising"));
        assert_eq!(first.pre.closing_date.as_deref(), Some("20/01/2025"));
        assert_eq!(
            first.link.as_deref(),
            Some("https://www.marketplace.gov.sg/opportunity/881")
        );
        assert_eq!(
            first.guid,
            identity_hash(&[
                "Integrated marketing campaign for SkillsFuture",
                "SkillsFuture Singapore"
            ])
        );
        assert_eq!(first.format, RawFormat::HtmlRow);
    }

    #[test]
    fn short_rows_are_kept_with_a_warning() {
        let scrape = scrape_listing(LISTING, "https://www.marketplace.gov.sg/listing");
        let short = &scrape.items[1];
        assert_eq!(short.title, "Booth fabrication");
        assert!(short.pre.agency.is_none());
        assert_eq!(scrape.errors.len(), 1);
        assert!(scrape.errors[0].contains("found 2"));
    }

    #[test]
    fn unrecognised_layout_is_reported_not_fatal() {
        let scrape = scrape_listing("<table><tr><td>x</td></tr></table>", "https://a.example/");
        assert!(scrape.items.is_empty());
        assert_eq!(scrape.errors.len(), 1);
    }
}

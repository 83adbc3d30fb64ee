//! Source adapter contracts plus the feed, tabular-XML and listing-table parsers.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tender_core::{RawItem, Source, SourceKind};
use tender_storage::{FetchError, PageFetcher};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub mod feed;
pub mod html_table;
pub mod links;
pub mod markup;

pub use feed::{parse_feed, parse_tabular, ROW_TAG_CANDIDATES, ROW_TAG_KEY};
pub use html_table::{scrape_listing, TableScrape, ROW_CLASS_HINTS};
pub use links::{accept_candidate, collect_hrefs, find_feed_links, resolve_url, HREF_CAP};

pub const CRATE_NAME: &str = "tender-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("source {source_id} has no fetchable url")]
    MissingUrl { source_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub feed_timeout: Duration,
    pub scrape_timeout: Duration,
}

impl AdapterContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            feed_timeout: Duration::from_secs(15),
            scrape_timeout: Duration::from_secs(20),
        }
    }
}

/// Items pulled from one source, plus row-level problems that did not stop the parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Harvest {
    pub items: Vec<RawItem>,
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn timeout(&self, ctx: &AdapterContext) -> Duration {
        ctx.feed_timeout
    }

    fn parse(&self, source: &Source, body: &str, page_url: &str) -> Result<Harvest, AdapterError>;

    async fn harvest(
        &self,
        fetcher: &dyn PageFetcher,
        ctx: &AdapterContext,
        source: &Source,
    ) -> Result<Harvest, AdapterError> {
        let url = source.fetch_url().ok_or_else(|| AdapterError::MissingUrl {
            source_id: source.source_id.clone(),
        })?;
        let page = fetcher
            .fetch_text(ctx.run_id, &source.source_id, url, self.timeout(ctx))
            .await?;
        debug!(
            source_id = %source.source_id,
            adapter = self.name(),
            bytes = page.body.len(),
            "parsing fetched page"
        );
        self.parse(source, &page.body, &page.final_url)
    }
}

/// RSS 2.0 and Atom feeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedAdapter;

#[async_trait]
impl SourceAdapter for FeedAdapter {
    fn name(&self) -> &'static str {
        "feed"
    }

    fn parse(&self, _source: &Source, body: &str, _page_url: &str) -> Result<Harvest, AdapterError> {
        Ok(Harvest {
            items: parse_feed(body)?,
            warnings: Vec::new(),
        })
    }
}

/// Row-oriented XML exports driven by the source's field map.
#[derive(Debug, Clone, Copy, Default)]
pub struct TabularXmlAdapter;

#[async_trait]
impl SourceAdapter for TabularXmlAdapter {
    fn name(&self) -> &'static str {
        "tabular_xml"
    }

    fn parse(&self, source: &Source, body: &str, _page_url: &str) -> Result<Harvest, AdapterError> {
        Ok(Harvest {
            items: parse_tabular(body, &source.field_map),
            warnings: Vec::new(),
        })
    }
}

/// The marketplace listing page that publishes an HTML table instead of a feed.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlTableAdapter;

#[async_trait]
impl SourceAdapter for HtmlTableAdapter {
    fn name(&self) -> &'static str {
        "html_table"
    }

    fn timeout(&self, ctx: &AdapterContext) -> Duration {
        ctx.scrape_timeout
    }

    fn parse(&self, _source: &Source, body: &str, page_url: &str) -> Result<Harvest, AdapterError> {
        let scrape = scrape_listing(body, page_url);
        Ok(Harvest {
            items: scrape.items,
            warnings: scrape.errors,
        })
    }
}

/// Picks the parser for a source. Hubs and reference pages are not ingested.
pub fn adapter_for_source(source: &Source) -> Option<Box<dyn SourceAdapter>> {
    match source.kind {
        SourceKind::RssXml => Some(Box::new(FeedAdapter)),
        SourceKind::ApiXml if source.field_map.is_empty() => Some(Box::new(FeedAdapter)),
        SourceKind::ApiXml => Some(Box::new(TabularXmlAdapter)),
        SourceKind::HtmlList => Some(Box::new(HtmlTableAdapter)),
        SourceKind::HtmlHub | SourceKind::HtmlReference => None,
    }
}

pub(crate) fn text_or_none(value: String) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

pub(crate) fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(e.to_string()))
}

pub(crate) fn element_text(element: ElementRef<'_>) -> Option<String> {
    text_or_none(element.text().collect::<String>())
}

pub(crate) fn select_all_attrs(
    document: &Html,
    css: &str,
    attr: &str,
) -> Result<Vec<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .filter_map(|n| n.value().attr(attr))
        .filter_map(|s| text_or_none(s.to_string()))
        .collect())
}

//! First-run registry seeding from the sources YAML file.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tender_storage::TenderStore;
use tracing::{debug, info};

use crate::config::load_seed_sources;

/// Loads the seed file into an empty registry. Returns how many sources were added;
/// a registry that already has rows is left untouched.
pub async fn seed_sources_if_empty(
    store: &dyn TenderStore,
    path: &Path,
    now: DateTime<Utc>,
) -> Result<usize> {
    let existing = store.count_sources().await.context("counting sources")?;
    if existing > 0 {
        debug!(existing, "source registry already populated; not seeding");
        return Ok(0);
    }
    let seeds = load_seed_sources(path)?;
    let mut inserted = 0;
    for seed in &seeds {
        if store
            .insert_source(seed, now)
            .await
            .with_context(|| format!("seeding source {}", seed.source_id))?
        {
            inserted += 1;
        }
    }
    info!(path = %path.display(), inserted, total = seeds.len(), "seeded source registry");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tender_storage::MemoryStore;

    #[tokio::test]
    async fn seeds_only_an_empty_registry() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"sources:
  - source_id: hk-emsd-rss-tender-notices
    name: EMSD Tender Notices
    jurisdiction: HK
    kind: rss_xml
    feed_url: https://www.emsd.gov.hk/tender_notices.xml
  - source_id: hk-emsd-duplicate-url
    name: Same feed twice
    jurisdiction: HK
    kind: rss_xml
    feed_url: https://www.emsd.gov.hk/tender_notices.xml
"#
        )
        .expect("write");
        let store = MemoryStore::new();
        let now = Utc::now();

        let added = seed_sources_if_empty(&store, file.path(), now).await.unwrap();
        assert_eq!(added, 1);
        let again = seed_sources_if_empty(&store, file.path(), now).await.unwrap();
        assert_eq!(again, 0);
        assert_eq!(store.count_sources().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_seed_file_is_an_error_for_empty_registry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MemoryStore::new();
        let err = seed_sources_if_empty(&store, &dir.path().join("sources.yaml"), Utc::now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sources.yaml"));
    }
}

//! Migration Resolver (C5): for one upgrade, the ordered list of migrations
//! between its old and new bundle digest.

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::bundle::MigrationSource;
use crate::model::{BundleRef, Migration, TagRecord, Upgrade};
use crate::registry::cache::{self, SharedCache};
use crate::registry::quay::TagLister;
use crate::utils::error::PmtError;

/// The number of concurrent `has_migration`/`fetch_migration` calls the
/// resolver issues while walking an upgrade window.
const DEFAULT_FANOUT: usize = 8;

pub struct MigrationResolver {
    tags: Arc<dyn TagLister>,
    inspector: Arc<dyn MigrationSource>,
    tag_list_cache: SharedCache<Arc<[TagRecord]>>,
    fanout: usize,
}

impl MigrationResolver {
    #[must_use]
    pub fn new(
        tags: Arc<dyn TagLister>,
        inspector: Arc<dyn MigrationSource>,
        tag_list_cache: SharedCache<Arc<[TagRecord]>>,
    ) -> Self {
        Self {
            tags,
            inspector,
            tag_list_cache,
            fanout: DEFAULT_FANOUT,
        }
    }

    #[must_use]
    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout.max(1);
        self
    }

    async fn tag_history(&self, repository: &str) -> Result<Arc<[TagRecord]>, PmtError> {
        let key = cache::key("list_tags", &[repository]);
        let tags = Arc::clone(&self.tags);
        let repo = repository.to_string();
        self.tag_list_cache
            .get_or_fill(key, || async move {
                let records = tags.list_tags(&repo).await?;
                Ok(Arc::from(records))
            })
            .await
    }

    /// Resolves the ordered migration list for `upgrade`, per the window
    /// algorithm: strictly-after-old through including-new, earliest
    /// occurrence wins on re-tag, downgrades yield an empty list with a
    /// warning rather than an error.
    pub async fn resolve(&self, upgrade: &Upgrade) -> Result<Vec<Migration>, PmtError> {
        let repository = repository_of(upgrade);
        let history = self.tag_history(&repository).await?;

        // History is newest-first; a chronological (old-to-new) walk needs
        // it reversed, with re-tags collapsed to their earliest occurrence.
        let chronological = dedup_to_earliest(&history);

        let old_pos = chronological
            .iter()
            .position(|r| r.digest == upgrade.current_digest);
        let new_pos = chronological
            .iter()
            .position(|r| r.digest == upgrade.new_digest);

        let (Some(old_pos), Some(new_pos)) = (old_pos, new_pos) else {
            return Err(PmtError::UpgradeEndpointNotFound {
                repository,
                digest: if old_pos.is_none() {
                    upgrade.current_digest.clone()
                } else {
                    upgrade.new_digest.clone()
                },
            });
        };

        self.warn_on_tag_hint_mismatch(upgrade, &chronological, new_pos);

        if new_pos < old_pos {
            tracing::warn!(
                dep = %upgrade.dep_name,
                old_digest = %upgrade.current_digest,
                new_digest = %upgrade.new_digest,
                "new bundle is chronologically older than old bundle; skipping migrations for this downgrade"
            );
            return Ok(Vec::new());
        }

        if new_pos == old_pos {
            return Ok(Vec::new());
        }

        let window = &chronological[old_pos + 1..=new_pos];
        let bundles: Vec<BundleRef> = window
            .iter()
            .map(|record| BundleRef::new(repository.clone(), record.tag.clone(), record.digest.clone()))
            .collect();

        let inspector = Arc::clone(&self.inspector);
        let migrations: Vec<Migration> = stream::iter(bundles.into_iter().map(|bundle| {
            let inspector = Arc::clone(&inspector);
            async move { inspector.fetch_migration(&bundle).await }
        }))
        .buffer_unordered(self.fanout)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<Option<Migration>>, PmtError>>()?
        .into_iter()
        .flatten()
        .collect();

        Ok(migrations)
    }

    fn warn_on_tag_hint_mismatch(&self, upgrade: &Upgrade, chronological: &[TagRecord], new_pos: usize) {
        if let Some(record) = chronological.get(new_pos)
            && record.tag != upgrade.new_value
        {
            tracing::warn!(
                dep = %upgrade.dep_name,
                expected_tag = %upgrade.new_value,
                actual_tag = %record.tag,
                "tag hint does not match the digest-derived tag"
            );
        }
    }
}

/// `repository` is derived from `dep_name`, which carries the fully
/// qualified image reference without tag or digest.
fn repository_of(upgrade: &Upgrade) -> String {
    upgrade.dep_name.clone()
}

/// Reverses the newest-first history into chronological order, keeping
/// only the earliest occurrence of each digest.
fn dedup_to_earliest(history: &[TagRecord]) -> Vec<TagRecord> {
    let mut chronological: Vec<TagRecord> = history.iter().rev().cloned().collect();
    let mut seen = std::collections::HashSet::new();
    chronological.retain(|record| seen.insert(record.digest.clone()));
    chronological
}

use crate::content_store::{ContentStore, ContentType, PendingContent};
use crate::pipeline::{WorkItem, WorkKind};
use anyhow::Result;

/// Finds the rows that still need a given kind of work. Never writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryScanner {
    kind: WorkKind,
}

impl DiscoveryScanner {
    pub fn new(kind: WorkKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> WorkKind {
        self.kind
    }

    pub fn scan(&self, store: &dyn ContentStore, now: i64) -> Result<Vec<WorkItem>> {
        let pending = self.pending(store)?;
        Ok(pending
            .into_iter()
            .map(|p| WorkItem::from_pending(self.kind, p, now))
            .collect())
    }

    fn pending(&self, store: &dyn ContentStore) -> Result<Vec<PendingContent>> {
        let enriched = [ContentType::Post, ContentType::JobPosting];
        match self.kind {
            WorkKind::ModeratePost => collect(&enriched, |ct| store.list_unprocessed(ct)),
            WorkKind::ModerateComment => store.list_unprocessed(ContentType::Comment),
            WorkKind::TagContent => collect(&enriched, |ct| store.list_untagged(ct)),
            WorkKind::EmbedContent => collect(&enriched, |ct| store.list_missing_embedding(ct)),
            WorkKind::EmbedSkill => store.list_skills_missing_embedding(),
            WorkKind::RefreshUserInterests => store.list_profiles_missing_interest_embedding(),
        }
    }
}

fn collect(
    types: &[ContentType],
    mut query: impl FnMut(ContentType) -> Result<Vec<PendingContent>>,
) -> Result<Vec<PendingContent>> {
    let mut all = Vec::new();
    for content_type in types {
        all.extend(query(*content_type)?);
    }
    Ok(all)
}

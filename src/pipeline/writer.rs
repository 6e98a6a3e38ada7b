//! The single write path for content and reports. Every successful write
//! removes the cache keys of whatever it touched.

use crate::cache::{CacheKey, ProjectionCache};
use crate::content_store::{
    ContentRef, ContentStore, ContentType, ModerationOutcome, ModerationReport, ModerationScores,
    ReportState, StateUpdate, Tag, TagSet,
};
use crate::server::metrics;
use anyhow::Result;
use std::sync::Arc;

#[derive(Clone)]
pub struct ContentWriter {
    store: Arc<dyn ContentStore>,
    cache: ProjectionCache,
}

impl ContentWriter {
    pub fn new(store: Arc<dyn ContentStore>, cache: ProjectionCache) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn cache(&self) -> &ProjectionCache {
        &self.cache
    }

    pub fn apply_moderation_result(
        &self,
        target: &ContentRef,
        scores: &ModerationScores,
        flagged: bool,
    ) -> Result<ModerationOutcome> {
        let outcome = self.store.apply_moderation_result(target, scores, flagged)?;
        match &outcome {
            ModerationOutcome::Missing => {}
            ModerationOutcome::Reported(report) => {
                metrics::record_moderation_report_created(target.content_type.as_str());
                self.cache.remove(&CacheKey::content(target));
                self.cache.remove(&CacheKey::report(&report.id));
                self.cache.remove(&CacheKey::all_reports());
            }
            _ => self.cache.remove(&CacheKey::content(target)),
        }
        Ok(outcome)
    }

    /// Also drops the author's profile projection, whose interests just changed.
    pub fn set_content_tags(
        &self,
        target: &ContentRef,
        author_id: Option<&str>,
        tags: &TagSet,
    ) -> Result<Vec<Tag>> {
        let stored = self.store.set_content_tags(target, tags)?;
        self.cache.remove(&CacheKey::content(target));
        if let Some(author_id) = author_id {
            self.cache
                .remove(&CacheKey::content(&ContentRef::new(ContentType::Profile, author_id)));
        }
        Ok(stored)
    }

    /// Writes a content, skill or profile-interest vector depending on the target's type.
    /// `source_text` is the text that was embedded.
    pub fn set_embedding(
        &self,
        target: &ContentRef,
        embedding: &[f32],
        source_text: &str,
    ) -> Result<bool> {
        let updated = match target.content_type {
            ContentType::Skill => self.store.set_skill_embedding(&target.content_id, embedding)?,
            ContentType::Profile => self
                .store
                .set_user_interest_embedding(&target.content_id, embedding, source_text)?,
            _ => self.store.set_content_embedding(target, embedding)?,
        };
        if updated {
            self.cache.remove(&CacheKey::content(target));
        }
        Ok(updated)
    }

    /// Compare-and-set on a report, optionally changing the reported content's visibility.
    pub fn update_report_state(
        &self,
        report: &ModerationReport,
        expected: ReportState,
        next: ReportState,
        hide_content: Option<bool>,
    ) -> Result<StateUpdate> {
        let update = self
            .store
            .update_report_state(&report.id, expected, next, hide_content)?;
        if update == StateUpdate::Applied {
            if hide_content.is_some() {
                self.cache.remove(&CacheKey::content(&report.target()));
            }
            self.cache.remove(&CacheKey::report(&report.id));
            self.cache.remove(&CacheKey::all_reports());
        }
        Ok(update)
    }
}

use super::models::*;
use super::schema::CONTENT_VERSIONED_SCHEMAS;
use super::{ContentStore, StateUpdate};
use crate::sqlite_persistence::{read_schema_version, VersionedSchema, BASE_DB_VERSION};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const REPORT_COLUMNS: &str = "id, content_id, content_type, author_id, toxicity, severe_toxicity, \
     obscene, threat, insult, identity_attack, sexual_explicit, reported_by, reason, \
     is_resolved, is_negative, created_at, updated_at";

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, notification_type, title, body, data, created_at, read_at";

pub struct SqliteContentStore {
    conn: Arc<Mutex<Connection>>,
}

fn latest_schema() -> Result<&'static VersionedSchema> {
    CONTENT_VERSIONED_SCHEMAS
        .last()
        .context("No content schema versions defined")
}

fn now() -> i64 {
    Utc::now().timestamp()
}

/// Tables whose rows go through moderation and can be soft-hidden.
fn moderated_table(content_type: ContentType) -> Result<&'static str> {
    match content_type {
        ContentType::Post | ContentType::JobPosting | ContentType::Comment => {
            content_type.table().context("missing table")
        }
        other => bail!("{} content is not moderated by the pipeline", other),
    }
}

/// Tables whose rows get tagged and embedded.
fn enriched_table(content_type: ContentType) -> Result<&'static str> {
    match content_type {
        ContentType::Post | ContentType::JobPosting => content_type.table().context("missing table"),
        other => bail!("{} content is not tagged or embedded by the pipeline", other),
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl SqliteContentStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open content database")?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let latest = latest_schema()?;
        if is_new_db {
            info!("Creating new content database at {:?}", path);
            latest.create(&conn)?;
        } else {
            let db_version = read_schema_version(&conn)?;
            if db_version < 1 {
                bail!(
                    "Content database version {} is invalid (expected >= 1)",
                    db_version
                );
            }

            let schema = CONTENT_VERSIONED_SCHEMAS
                .iter()
                .find(|s| s.version == db_version as usize)
                .with_context(|| format!("Unknown content database version {}", db_version))?;
            schema.validate(&conn).with_context(|| {
                format!(
                    "Content database schema validation failed for version {}",
                    db_version
                )
            })?;

            if (db_version as usize) < latest.version {
                info!(
                    "Migrating content database from version {} to {}",
                    db_version, latest.version
                );
                Self::migrate(&mut conn, db_version as usize)?;
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate(conn: &mut Connection, from_version: usize) -> Result<()> {
        let tx = conn.transaction()?;
        let mut current = from_version;
        for schema in CONTENT_VERSIONED_SCHEMAS
            .iter()
            .filter(|s| s.version > from_version)
        {
            if let Some(migration_fn) = schema.migration {
                migration_fn(&tx).with_context(|| {
                    format!("Failed to run migration to version {}", schema.version)
                })?;
            }
            current = schema.version;
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + current),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn row_to_pending(
        content_type: ContentType,
        row: &rusqlite::Row,
    ) -> rusqlite::Result<PendingContent> {
        Ok(PendingContent {
            target: ContentRef::new(content_type, row.get::<_, String>("id")?),
            author_id: row.get("author_id")?,
            title: row.get("title")?,
            content: row.get("content")?,
        })
    }

    fn row_to_tag(row: &rusqlite::Row) -> rusqlite::Result<Tag> {
        Ok(Tag {
            id: row.get("id")?,
            english_name: row.get("english_name")?,
            arabic_name: row.get("arabic_name")?,
            description: row.get("description")?,
        })
    }

    fn row_to_report(row: &rusqlite::Row) -> rusqlite::Result<ModerationReport> {
        let content_type_str: String = row.get("content_type")?;
        let content_type = ContentType::parse(&content_type_str).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(
                2,
                format!("content_type '{}'", content_type_str),
                rusqlite::types::Type::Text,
            )
        })?;
        let reported_by_str: String = row.get("reported_by")?;

        Ok(ModerationReport {
            id: row.get("id")?,
            content_id: row.get("content_id")?,
            content_type,
            author_id: row.get("author_id")?,
            scores: ModerationScores {
                toxicity: row.get("toxicity")?,
                severe_toxicity: row.get("severe_toxicity")?,
                obscene: row.get("obscene")?,
                threat: row.get("threat")?,
                insult: row.get("insult")?,
                identity_attack: row.get("identity_attack")?,
                sexual_explicit: row.get("sexual_explicit")?,
            },
            reported_by: ReportedBy::parse(&reported_by_str).unwrap_or(ReportedBy::User),
            reason: row.get("reason")?,
            is_resolved: row.get("is_resolved")?,
            is_negative: row.get("is_negative")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn row_to_notification(row: &rusqlite::Row) -> rusqlite::Result<Notification> {
        let type_str: String = row.get("notification_type")?;
        let data_str: String = row.get("data")?;
        Ok(Notification {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            notification_type: NotificationType::parse(&type_str)
                .unwrap_or(NotificationType::ContentHidden),
            title: row.get("title")?,
            body: row.get("body")?,
            data: serde_json::from_str(&data_str).unwrap_or(serde_json::Value::Null),
            created_at: row.get("created_at")?,
            read_at: row.get("read_at")?,
        })
    }

    fn find_open_ai_report(
        conn: &Connection,
        target: &ContentRef,
    ) -> Result<Option<ModerationReport>> {
        let report = conn
            .query_row(
                &format!(
                    "SELECT {} FROM moderation_reports
                     WHERE content_id = ?1 AND content_type = ?2
                       AND reported_by = 'ai' AND is_resolved = 0",
                    REPORT_COLUMNS
                ),
                params![target.content_id, target.content_type.as_str()],
                Self::row_to_report,
            )
            .optional()?;
        Ok(report)
    }

    fn insert_report_with(
        conn: &Connection,
        report: &NewReport,
        timestamp: i64,
    ) -> Result<ModerationReport> {
        let id = Uuid::new_v4().to_string();
        let scores = &report.scores;
        conn.execute(
            &format!(
                "INSERT INTO moderation_reports ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0, ?14, ?15, ?15)",
                REPORT_COLUMNS
            ),
            params![
                id,
                report.target.content_id,
                report.target.content_type.as_str(),
                report.author_id,
                scores.toxicity,
                scores.severe_toxicity,
                scores.obscene,
                scores.threat,
                scores.insult,
                scores.identity_attack,
                scores.sexual_explicit,
                report.reported_by.as_str(),
                report.reason,
                report.is_negative,
                timestamp,
            ],
        )?;

        Ok(ModerationReport {
            id,
            content_id: report.target.content_id.clone(),
            content_type: report.target.content_type,
            author_id: report.author_id.clone(),
            scores: *scores,
            reported_by: report.reported_by,
            reason: report.reason.clone(),
            is_resolved: false,
            is_negative: report.is_negative,
            created_at: timestamp,
            updated_at: timestamp,
        })
    }

    fn tags_for_content(conn: &Connection, target: &ContentRef) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT t.english_name FROM content_tags ct
             JOIN tags t ON t.id = ct.tag_id
             WHERE ct.content_id = ?1 AND ct.content_type = ?2
             ORDER BY t.english_name",
        )?;
        let tags = stmt
            .query_map(
                params![target.content_id, target.content_type.as_str()],
                |row| row.get(0),
            )?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(tags)
    }

    fn interests_of(conn: &Connection, user_id: &str) -> Result<Vec<Tag>> {
        let mut stmt = conn.prepare(
            "SELECT t.id, t.english_name, t.arabic_name, t.description
             FROM profile_interests pi
             JOIN tags t ON t.id = pi.tag_id
             WHERE pi.profile_id = ?1
             ORDER BY t.english_name",
        )?;
        let tags = stmt
            .query_map(params![user_id], Self::row_to_tag)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    fn list_enriched(&self, content_type: ContentType, predicate: &str) -> Result<Vec<PendingContent>> {
        let table = enriched_table(content_type)?;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, author_id, title, content FROM {} WHERE {} ORDER BY created_at",
            table, predicate
        ))?;
        let rows = stmt
            .query_map([], |row| Self::row_to_pending(content_type, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn insert_authored(
        &self,
        table: &str,
        author_id: &str,
        title: &str,
        content: &str,
    ) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        let timestamp = now();
        conn.execute(
            &format!(
                "INSERT INTO {} (id, author_id, title, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                table
            ),
            params![id, author_id, title, content, timestamp],
        )?;
        Ok(id)
    }
}

/// Text the interest embedding of a profile is computed from.
pub(crate) fn interest_text(tags: &[Tag]) -> String {
    tags.iter()
        .map(|t| format!("{} {} {} ", t.english_name, t.arabic_name, t.description))
        .collect()
}

impl ContentStore for SqliteContentStore {
    fn insert_post(&self, author_id: &str, title: &str, content: &str) -> Result<String> {
        self.insert_authored("posts", author_id, title, content)
    }

    fn insert_job_posting(&self, author_id: &str, title: &str, content: &str) -> Result<String> {
        self.insert_authored("job_postings", author_id, title, content)
    }

    fn insert_comment(&self, author_id: &str, post_id: &str, content: &str) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        let timestamp = now();
        conn.execute(
            "INSERT INTO comments (id, author_id, post_id, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, author_id, post_id, content, timestamp],
        )?;
        Ok(id)
    }

    fn insert_skill(&self, name: &str, description: Option<&str>) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO skills (id, name, description, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, description, now()],
        )?;
        Ok(id)
    }

    fn insert_profile(&self, user_id: &str, display_name: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO profiles (id, display_name, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, display_name, now()],
        )?;
        Ok(())
    }

    fn get_content(&self, target: &ContentRef) -> Result<Option<ContentRecord>> {
        let conn = self.conn.lock().unwrap();
        let id = target.content_id.as_str();
        let content_type = target.content_type;

        let record = match content_type {
            ContentType::Post | ContentType::JobPosting => {
                let table = enriched_table(content_type)?;
                let record = conn
                    .query_row(
                        &format!(
                            "SELECT id, author_id, title, content, language, is_processed, is_tagged,
                                    is_deleted, embedding IS NOT NULL, created_at
                             FROM {} WHERE id = ?1",
                            table
                        ),
                        params![id],
                        |row| {
                            Ok(ContentRecord {
                                content_type,
                                id: row.get(0)?,
                                author_id: row.get(1)?,
                                title: row.get(2)?,
                                content: row.get(3)?,
                                language: row.get(4)?,
                                is_processed: Some(row.get(5)?),
                                is_tagged: Some(row.get(6)?),
                                is_deleted: Some(row.get(7)?),
                                has_embedding: row.get(8)?,
                                tags: Vec::new(),
                                created_at: row.get(9)?,
                            })
                        },
                    )
                    .optional()?;
                match record {
                    Some(mut record) => {
                        record.tags = Self::tags_for_content(&conn, target)?;
                        Some(record)
                    }
                    None => None,
                }
            }
            ContentType::Comment => conn
                .query_row(
                    "SELECT id, author_id, content, is_processed, is_deleted, created_at
                     FROM comments WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(ContentRecord {
                            content_type,
                            id: row.get(0)?,
                            author_id: row.get(1)?,
                            title: None,
                            content: row.get(2)?,
                            language: None,
                            is_processed: Some(row.get(3)?),
                            is_tagged: None,
                            is_deleted: Some(row.get(4)?),
                            has_embedding: false,
                            tags: Vec::new(),
                            created_at: row.get(5)?,
                        })
                    },
                )
                .optional()?,
            ContentType::Skill => conn
                .query_row(
                    "SELECT id, name, description, embedding IS NOT NULL, created_at
                     FROM skills WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(ContentRecord {
                            content_type,
                            id: row.get(0)?,
                            author_id: None,
                            title: row.get(1)?,
                            content: row.get(2)?,
                            language: None,
                            is_processed: None,
                            is_tagged: None,
                            is_deleted: None,
                            has_embedding: row.get(3)?,
                            tags: Vec::new(),
                            created_at: row.get(4)?,
                        })
                    },
                )
                .optional()?,
            ContentType::Profile => {
                let record = conn
                    .query_row(
                        "SELECT id, display_name, user_interest_embedding IS NOT NULL, created_at
                         FROM profiles WHERE id = ?1",
                        params![id],
                        |row| {
                            Ok(ContentRecord {
                                content_type,
                                id: row.get(0)?,
                                author_id: row.get(0)?,
                                title: row.get(1)?,
                                content: None,
                                language: None,
                                is_processed: None,
                                is_tagged: None,
                                is_deleted: None,
                                has_embedding: row.get(2)?,
                                tags: Vec::new(),
                                created_at: row.get(3)?,
                            })
                        },
                    )
                    .optional()?;
                match record {
                    Some(mut record) => {
                        record.tags = Self::interests_of(&conn, id)?
                            .into_iter()
                            .map(|t| t.english_name)
                            .collect();
                        Some(record)
                    }
                    None => None,
                }
            }
            _ => None,
        };
        Ok(record)
    }

    fn list_unprocessed(&self, content_type: ContentType) -> Result<Vec<PendingContent>> {
        let table = moderated_table(content_type)?;
        let title_column = if content_type == ContentType::Comment {
            "NULL"
        } else {
            "title"
        };
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, author_id, {} AS title, content FROM {}
             WHERE is_processed = 0 AND is_deleted = 0
             ORDER BY created_at",
            title_column, table
        ))?;
        let rows = stmt
            .query_map([], |row| Self::row_to_pending(content_type, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn list_untagged(&self, content_type: ContentType) -> Result<Vec<PendingContent>> {
        self.list_enriched(
            content_type,
            "is_processed = 1 AND is_tagged = 0 AND is_deleted = 0",
        )
    }

    fn list_missing_embedding(&self, content_type: ContentType) -> Result<Vec<PendingContent>> {
        self.list_enriched(
            content_type,
            "embedding IS NULL AND is_processed = 1 AND is_deleted = 0",
        )
    }

    fn list_skills_missing_embedding(&self) -> Result<Vec<PendingContent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, description FROM skills WHERE embedding IS NULL ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let name: String = row.get("name")?;
                let description: Option<String> = row.get("description")?;
                let content = match description.as_deref() {
                    Some(d) if !d.is_empty() => format!("{} {}", name, d),
                    _ => name.clone(),
                };
                Ok(PendingContent {
                    target: ContentRef::new(ContentType::Skill, row.get::<_, String>("id")?),
                    author_id: None,
                    title: Some(name),
                    content,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn list_profiles_missing_interest_embedding(&self) -> Result<Vec<PendingContent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT p.id FROM profiles p
             WHERE p.user_interest_embedding IS NULL
               AND EXISTS (SELECT 1 FROM profile_interests pi WHERE pi.profile_id = p.id)
             ORDER BY p.created_at",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut pending = Vec::with_capacity(ids.len());
        for id in ids {
            let interests = Self::interests_of(&conn, &id)?;
            pending.push(PendingContent {
                target: ContentRef::new(ContentType::Profile, id.clone()),
                author_id: Some(id),
                title: None,
                content: interest_text(&interests),
            });
        }
        Ok(pending)
    }

    fn apply_moderation_result(
        &self,
        target: &ContentRef,
        scores: &ModerationScores,
        flagged: bool,
    ) -> Result<ModerationOutcome> {
        let table = moderated_table(target.content_type)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let row: Option<(bool, String)> = tx
            .query_row(
                &format!("SELECT is_processed, author_id FROM {} WHERE id = ?1", table),
                params![target.content_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((is_processed, author_id)) = row else {
            return Ok(ModerationOutcome::Missing);
        };
        if is_processed {
            debug!("{} already processed, skipping moderation write", target);
            return Ok(ModerationOutcome::AlreadyProcessed);
        }

        let timestamp = now();
        let outcome = if !flagged {
            ModerationOutcome::Clean
        } else if Self::find_open_ai_report(&tx, target)?.is_some() {
            ModerationOutcome::AlreadyReported
        } else {
            let report = Self::insert_report_with(
                &tx,
                &NewReport {
                    target: target.clone(),
                    author_id: Some(author_id),
                    scores: *scores,
                    reported_by: ReportedBy::Ai,
                    reason: AI_REPORT_REASON.to_string(),
                    is_negative: true,
                },
                timestamp,
            )?;
            tx.execute(
                &format!(
                    "UPDATE {} SET is_deleted = 1, updated_at = ?1 WHERE id = ?2",
                    table
                ),
                params![timestamp, target.content_id],
            )?;
            ModerationOutcome::Reported(report)
        };

        tx.execute(
            &format!(
                "UPDATE {} SET is_processed = 1, updated_at = ?1 WHERE id = ?2",
                table
            ),
            params![timestamp, target.content_id],
        )?;
        tx.commit()?;
        Ok(outcome)
    }

    fn set_content_tags(&self, target: &ContentRef, tags: &TagSet) -> Result<Vec<Tag>> {
        let table = enriched_table(target.content_type)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let author_id: Option<String> = tx
            .query_row(
                &format!("SELECT author_id FROM {} WHERE id = ?1", table),
                params![target.content_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(author_id) = author_id else {
            bail!("{} not found", target);
        };

        let mut stored = Vec::with_capacity(tags.tags.len());
        for suggestion in &tags.tags {
            let english = suggestion.english.trim();
            if english.is_empty() {
                continue;
            }
            tx.execute(
                "INSERT INTO tags (english_name, arabic_name, description, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(english_name) DO UPDATE
                 SET arabic_name = excluded.arabic_name, description = excluded.description",
                params![
                    english,
                    suggestion.arabic.trim(),
                    suggestion.description.trim(),
                    now()
                ],
            )?;
            let tag = tx.query_row(
                "SELECT id, english_name, arabic_name, description FROM tags WHERE english_name = ?1",
                params![english],
                Self::row_to_tag,
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO content_tags (content_id, content_type, tag_id)
                 VALUES (?1, ?2, ?3)",
                params![target.content_id, target.content_type.as_str(), tag.id],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO profile_interests (profile_id, tag_id)
                 SELECT ?1, ?2 WHERE EXISTS (SELECT 1 FROM profiles WHERE id = ?1)",
                params![author_id, tag.id],
            )?;
            stored.push(tag);
        }

        tx.execute(
            &format!(
                "UPDATE {} SET is_tagged = 1, language = ?1, updated_at = ?2 WHERE id = ?3",
                table
            ),
            params![tags.language, now(), target.content_id],
        )?;
        // The author's interests changed, so their interest vector is stale
        tx.execute(
            "UPDATE profiles SET user_interest_embedding = NULL WHERE id = ?1",
            params![author_id],
        )?;
        tx.commit()?;
        Ok(stored)
    }

    fn set_content_embedding(&self, target: &ContentRef, embedding: &[f32]) -> Result<bool> {
        let table = enriched_table(target.content_type)?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET embedding = ?1, updated_at = ?2 WHERE id = ?3",
                table
            ),
            params![embedding_to_blob(embedding), now(), target.content_id],
        )?;
        Ok(changed > 0)
    }

    fn set_skill_embedding(&self, skill_id: &str, embedding: &[f32]) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE skills SET embedding = ?1 WHERE id = ?2",
            params![embedding_to_blob(embedding), skill_id],
        )?;
        Ok(changed > 0)
    }

    fn set_user_interest_embedding(
        &self,
        user_id: &str,
        embedding: &[f32],
        source_text: &str,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        // Interests tagged after the vector was requested make it stale
        if interest_text(&Self::interests_of(&tx, user_id)?) != source_text {
            debug!("Interests of {} changed, dropping stale embedding", user_id);
            return Ok(false);
        }
        let changed = tx.execute(
            "UPDATE profiles SET user_interest_embedding = ?1 WHERE id = ?2",
            params![embedding_to_blob(embedding), user_id],
        )?;
        tx.commit()?;
        Ok(changed > 0)
    }

    fn get_profile_interests(&self, user_id: &str) -> Result<Vec<Tag>> {
        let conn = self.conn.lock().unwrap();
        Self::interests_of(&conn, user_id)
    }

    fn set_content_hidden(&self, target: &ContentRef, hidden: bool) -> Result<bool> {
        let table = moderated_table(target.content_type)?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET is_deleted = ?1, updated_at = ?2 WHERE id = ?3 AND is_deleted != ?1",
                table
            ),
            params![hidden, now(), target.content_id],
        )?;
        Ok(changed > 0)
    }

    fn insert_report(&self, report: &NewReport) -> Result<ModerationReport> {
        let conn = self.conn.lock().unwrap();
        Self::insert_report_with(&conn, report, now())
    }

    fn get_report(&self, id: &str) -> Result<Option<ModerationReport>> {
        let conn = self.conn.lock().unwrap();
        let report = conn
            .query_row(
                &format!("SELECT {} FROM moderation_reports WHERE id = ?1", REPORT_COLUMNS),
                params![id],
                Self::row_to_report,
            )
            .optional()?;
        Ok(report)
    }

    fn list_reports(&self) -> Result<Vec<ModerationReport>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM moderation_reports ORDER BY created_at DESC, id",
            REPORT_COLUMNS
        ))?;
        let reports = stmt
            .query_map([], Self::row_to_report)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(reports)
    }

    fn find_unresolved_ai_report(&self, target: &ContentRef) -> Result<Option<ModerationReport>> {
        let conn = self.conn.lock().unwrap();
        Self::find_open_ai_report(&conn, target)
    }

    fn update_report_state(
        &self,
        id: &str,
        expected: ReportState,
        next: ReportState,
        hide_content: Option<bool>,
    ) -> Result<StateUpdate> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let timestamp = now();

        let changed = match tx.execute(
            "UPDATE moderation_reports SET is_resolved = ?1, is_negative = ?2, updated_at = ?3
             WHERE id = ?4 AND is_resolved = ?5 AND is_negative = ?6",
            params![
                next.is_resolved(),
                next.is_negative(),
                timestamp,
                id,
                expected.is_resolved(),
                expected.is_negative()
            ],
        ) {
            Ok(changed) => changed,
            Err(err) if is_constraint_violation(&err) => return Ok(StateUpdate::Conflict),
            Err(err) => return Err(err.into()),
        };
        if changed == 0 {
            return Ok(StateUpdate::Stale);
        }

        if let Some(hidden) = hide_content {
            let (content_type, content_id): (String, String) = tx.query_row(
                "SELECT content_type, content_id FROM moderation_reports WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            if let Some(content_type) =
                ContentType::parse(&content_type).filter(ContentType::is_moderated)
            {
                let table = moderated_table(content_type)?;
                tx.execute(
                    &format!(
                        "UPDATE {} SET is_deleted = ?1, updated_at = ?2 WHERE id = ?3",
                        table
                    ),
                    params![hidden, timestamp, content_id],
                )?;
            }
        }

        tx.commit()?;
        Ok(StateUpdate::Applied)
    }

    fn insert_notification(&self, notification: &Notification) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO notifications ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                NOTIFICATION_COLUMNS
            ),
            params![
                notification.id,
                notification.user_id,
                notification.notification_type.as_str(),
                notification.title,
                notification.body,
                notification.data.to_string(),
                notification.created_at,
                notification.read_at,
            ],
        )?;
        Ok(())
    }

    fn list_notifications(&self, user_id: &str) -> Result<Vec<Notification>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM notifications WHERE user_id = ?1 ORDER BY created_at DESC",
            NOTIFICATION_COLUMNS
        ))?;
        let notifications = stmt
            .query_map(params![user_id], Self::row_to_notification)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct TestStore {
        store: SqliteContentStore,
        _temp_dir: TempDir,
    }

    fn create_test_store() -> TestStore {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteContentStore::new(temp_dir.path().join("content.db")).unwrap();
        TestStore {
            store,
            _temp_dir: temp_dir,
        }
    }

    fn flagged_scores() -> ModerationScores {
        ModerationScores {
            toxicity: 0.85,
            ..Default::default()
        }
    }

    fn tag(english: &str) -> TagSuggestion {
        TagSuggestion {
            english: english.to_string(),
            arabic: format!("{}-ar", english),
            description: format!("about {}", english),
        }
    }

    #[test]
    fn test_reopen_existing_database_validates_schema() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("content.db");
        {
            let store = SqliteContentStore::new(&path).unwrap();
            store.insert_post("u1", "t", "c").unwrap();
        }
        let store = SqliteContentStore::new(&path).unwrap();
        assert_eq!(store.list_unprocessed(ContentType::Post).unwrap().len(), 1);
    }

    #[test]
    fn test_list_unprocessed_skips_processed_and_hidden() {
        let test = create_test_store();
        let store = &test.store;

        let pending = store.insert_post("u1", "Hello", "world").unwrap();
        let processed = store.insert_post("u1", "Done", "x").unwrap();
        let hidden = store.insert_post("u1", "Hidden", "x").unwrap();
        store
            .apply_moderation_result(
                &ContentRef::new(ContentType::Post, processed),
                &ModerationScores::default(),
                false,
            )
            .unwrap();
        store
            .set_content_hidden(&ContentRef::new(ContentType::Post, hidden), true)
            .unwrap();

        let rows = store.list_unprocessed(ContentType::Post).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].target.content_id, pending);
        assert_eq!(rows[0].title.as_deref(), Some("Hello"));
        assert_eq!(rows[0].author_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_comments_have_no_title() {
        let test = create_test_store();
        let store = &test.store;
        let post = store.insert_post("u1", "t", "c").unwrap();
        store.insert_comment("u2", &post, "nice").unwrap();

        let rows = store.list_unprocessed(ContentType::Comment).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, None);
        assert_eq!(rows[0].content, "nice");
    }

    #[test]
    fn test_clean_moderation_marks_processed_without_report() {
        let test = create_test_store();
        let store = &test.store;
        let id = store.insert_post("u1", "t", "c").unwrap();
        let target = ContentRef::new(ContentType::Post, id);

        let outcome = store
            .apply_moderation_result(&target, &ModerationScores::default(), false)
            .unwrap();
        assert_eq!(outcome, ModerationOutcome::Clean);

        let record = store.get_content(&target).unwrap().unwrap();
        assert_eq!(record.is_processed, Some(true));
        assert_eq!(record.is_deleted, Some(false));
        assert!(store.list_reports().unwrap().is_empty());
    }

    #[test]
    fn test_flagged_moderation_creates_single_report() {
        let test = create_test_store();
        let store = &test.store;
        let id = store.insert_post("u1", "t", "c").unwrap();
        let target = ContentRef::new(ContentType::Post, id);

        let outcome = store
            .apply_moderation_result(&target, &flagged_scores(), true)
            .unwrap();
        let ModerationOutcome::Reported(report) = outcome else {
            panic!("expected a report, got {:?}", outcome);
        };
        assert_eq!(report.reported_by, ReportedBy::Ai);
        assert!(report.is_negative);
        assert!(!report.is_resolved);
        assert_eq!(report.author_id.as_deref(), Some("u1"));
        assert_eq!(report.reason, AI_REPORT_REASON);

        let second = store
            .apply_moderation_result(&target, &flagged_scores(), true)
            .unwrap();
        assert_eq!(second, ModerationOutcome::AlreadyProcessed);

        let record = store.get_content(&target).unwrap().unwrap();
        assert_eq!(record.is_processed, Some(true));
        assert_eq!(record.is_deleted, Some(true));
        assert_eq!(store.list_reports().unwrap().len(), 1);
    }

    #[test]
    fn test_flagged_moderation_with_open_report_is_suppressed() {
        let test = create_test_store();
        let store = &test.store;
        let id = store.insert_job_posting("u1", "Hiring", "c").unwrap();
        let target = ContentRef::new(ContentType::JobPosting, id);
        store
            .insert_report(&NewReport {
                target: target.clone(),
                author_id: Some("u1".to_string()),
                scores: flagged_scores(),
                reported_by: ReportedBy::Ai,
                reason: AI_REPORT_REASON.to_string(),
                is_negative: true,
            })
            .unwrap();

        let outcome = store
            .apply_moderation_result(&target, &flagged_scores(), true)
            .unwrap();
        assert_eq!(outcome, ModerationOutcome::AlreadyReported);
        assert_eq!(store.list_reports().unwrap().len(), 1);
        assert_eq!(
            store.get_content(&target).unwrap().unwrap().is_processed,
            Some(true)
        );
    }

    #[test]
    fn test_moderation_of_missing_content() {
        let test = create_test_store();
        let outcome = test
            .store
            .apply_moderation_result(
                &ContentRef::new(ContentType::Post, "nope"),
                &ModerationScores::default(),
                false,
            )
            .unwrap();
        assert_eq!(outcome, ModerationOutcome::Missing);
    }

    #[test]
    fn test_set_content_tags_links_interests_and_clears_embedding() {
        let test = create_test_store();
        let store = &test.store;
        store.insert_profile("u1", "Alice").unwrap();
        assert!(store.set_user_interest_embedding("u1", &[1.0, 2.0], "").unwrap());
        let id = store.insert_post("u1", "Rust jobs", "c").unwrap();
        let target = ContentRef::new(ContentType::Post, id);
        store
            .apply_moderation_result(&target, &ModerationScores::default(), false)
            .unwrap();
        assert_eq!(store.list_untagged(ContentType::Post).unwrap().len(), 1);

        let tag_set = TagSet {
            language: "English".to_string(),
            tags: vec![tag("rust"), tag("jobs"), tag("  ")],
        };
        let stored = store.set_content_tags(&target, &tag_set).unwrap();
        assert_eq!(stored.len(), 2);
        // Tagging again is idempotent
        store.set_content_tags(&target, &tag_set).unwrap();

        let record = store.get_content(&target).unwrap().unwrap();
        assert_eq!(record.is_tagged, Some(true));
        assert_eq!(record.language.as_deref(), Some("English"));
        assert_eq!(record.tags, vec!["jobs".to_string(), "rust".to_string()]);
        assert!(store.list_untagged(ContentType::Post).unwrap().is_empty());

        let interests = store.get_profile_interests("u1").unwrap();
        assert_eq!(interests.len(), 2);
        let profile = store
            .get_content(&ContentRef::new(ContentType::Profile, "u1"))
            .unwrap()
            .unwrap();
        assert!(!profile.has_embedding);

        let pending = store.list_profiles_missing_interest_embedding().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].content,
            "jobs jobs-ar about jobs rust rust-ar about rust "
        );
    }

    #[test]
    fn test_stale_interest_embedding_is_not_stored() {
        let test = create_test_store();
        let store = &test.store;
        store.insert_profile("u1", "Alice").unwrap();
        let first = store.insert_post("u1", "Rust", "c").unwrap();
        let second = store.insert_post("u1", "Go", "c").unwrap();
        for id in [&first, &second] {
            store
                .apply_moderation_result(
                    &ContentRef::new(ContentType::Post, id.as_str()),
                    &ModerationScores::default(),
                    false,
                )
                .unwrap();
        }
        let tag_one = |id: &str, name: &str| {
            let tag_set = TagSet {
                language: "English".to_string(),
                tags: vec![tag(name)],
            };
            store
                .set_content_tags(&ContentRef::new(ContentType::Post, id), &tag_set)
                .unwrap();
        };

        tag_one(&first, "rust");
        let stale = store.list_profiles_missing_interest_embedding().unwrap();
        // A new interest lands while the vector for the old text is computed
        tag_one(&second, "golang");

        assert!(!store
            .set_user_interest_embedding("u1", &[1.0], &stale[0].content)
            .unwrap());
        let pending = store.list_profiles_missing_interest_embedding().unwrap();
        assert_eq!(pending.len(), 1);
        assert_ne!(pending[0].content, stale[0].content);

        assert!(store
            .set_user_interest_embedding("u1", &[1.0], &pending[0].content)
            .unwrap());
        assert!(store.list_profiles_missing_interest_embedding().unwrap().is_empty());
    }

    #[test]
    fn test_embedding_predicates() {
        let test = create_test_store();
        let store = &test.store;
        let id = store.insert_post("u1", "t", "c").unwrap();
        let target = ContentRef::new(ContentType::Post, id);
        // Unmoderated content is not embedded yet
        assert!(store.list_missing_embedding(ContentType::Post).unwrap().is_empty());

        store
            .apply_moderation_result(&target, &ModerationScores::default(), false)
            .unwrap();
        assert_eq!(store.list_missing_embedding(ContentType::Post).unwrap().len(), 1);
        assert!(store.set_content_embedding(&target, &[0.5, 0.25]).unwrap());
        assert!(store.list_missing_embedding(ContentType::Post).unwrap().is_empty());

        let skill = store.insert_skill("Rust", Some("systems language")).unwrap();
        let skills = store.list_skills_missing_embedding().unwrap();
        assert_eq!(skills[0].content, "Rust systems language");
        assert!(store.set_skill_embedding(&skill, &[1.0]).unwrap());
        assert!(store.list_skills_missing_embedding().unwrap().is_empty());
    }

    #[test]
    fn test_update_report_state_compare_and_set() {
        let test = create_test_store();
        let store = &test.store;
        let id = store.insert_post("u1", "t", "c").unwrap();
        let target = ContentRef::new(ContentType::Post, id);
        let ModerationOutcome::Reported(report) = store
            .apply_moderation_result(&target, &flagged_scores(), true)
            .unwrap()
        else {
            panic!("expected report");
        };

        let result = store
            .update_report_state(
                &report.id,
                ReportState::UnresolvedFlagged,
                ReportState::ResolvedClean,
                Some(false),
            )
            .unwrap();
        assert_eq!(result, StateUpdate::Applied);
        assert_eq!(
            store.get_content(&target).unwrap().unwrap().is_deleted,
            Some(false)
        );

        // Second writer still expects the old state
        let stale = store
            .update_report_state(
                &report.id,
                ReportState::UnresolvedFlagged,
                ReportState::ResolvedClean,
                Some(false),
            )
            .unwrap();
        assert_eq!(stale, StateUpdate::Stale);
    }

    #[test]
    fn test_reopening_ai_report_conflicts_with_open_one() {
        let test = create_test_store();
        let store = &test.store;
        let target = ContentRef::new(ContentType::Post, "p1");
        let new_report = NewReport {
            target: target.clone(),
            author_id: None,
            scores: flagged_scores(),
            reported_by: ReportedBy::Ai,
            reason: AI_REPORT_REASON.to_string(),
            is_negative: true,
        };
        let first = store.insert_report(&new_report).unwrap();
        store
            .update_report_state(
                &first.id,
                ReportState::UnresolvedFlagged,
                ReportState::ResolvedFlagged,
                None,
            )
            .unwrap();
        store.insert_report(&new_report).unwrap();

        let result = store
            .update_report_state(
                &first.id,
                ReportState::ResolvedFlagged,
                ReportState::UnresolvedFlagged,
                None,
            )
            .unwrap();
        assert_eq!(result, StateUpdate::Conflict);
    }

    #[test]
    fn test_notifications_round_trip() {
        let test = create_test_store();
        let store = &test.store;
        let notification = Notification {
            id: "n1".to_string(),
            user_id: "u1".to_string(),
            notification_type: NotificationType::ContentRestored,
            title: "Restored".to_string(),
            body: None,
            data: serde_json::json!({"content_id": "p1"}),
            created_at: 100,
            read_at: None,
        };
        store.insert_notification(&notification).unwrap();

        let listed = store.list_notifications("u1").unwrap();
        assert_eq!(listed, vec![notification]);
        assert!(store.list_notifications("u2").unwrap().is_empty());
    }
}

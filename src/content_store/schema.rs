//! SQLite schema for the content database.
//!
//! Only the fields the enrichment pipeline reads or writes are modelled here;
//! the rest of each entity lives with the application that owns it.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    ForeignKey, ForeignKeyOnChange, Index, SqlType, Table, VersionedSchema,
    DEFAULT_TIMESTAMP,
};

// =============================================================================
// Version 1 - Content, tags and moderation reports
// =============================================================================

const POSTS_TABLE_V1: Table = Table {
    name: "posts",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("author_id", &SqlType::Text, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("content", &SqlType::Text, non_null = true),
        sqlite_column!("language", &SqlType::Text),
        sqlite_column!(
            "is_processed",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "is_tagged",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "is_deleted",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("embedding", &SqlType::Blob),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[Index::plain(
        "idx_posts_pending",
        "is_processed, is_deleted",
    )],
    unique_constraints: &[],
};

/// Same shape as posts; job postings go through the same moderation queue.
const JOB_POSTINGS_TABLE_V1: Table = Table {
    name: "job_postings",
    columns: POSTS_TABLE_V1.columns,
    indices: &[Index::plain(
        "idx_job_postings_pending",
        "is_processed, is_deleted",
    )],
    unique_constraints: &[],
};

const POST_FK: ForeignKey = ForeignKey {
    foreign_table: "posts",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const COMMENTS_TABLE_V1: Table = Table {
    name: "comments",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("author_id", &SqlType::Text, non_null = true),
        sqlite_column!(
            "post_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&POST_FK)
        ),
        sqlite_column!("content", &SqlType::Text, non_null = true),
        sqlite_column!(
            "is_processed",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "is_deleted",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[
        Index::plain("idx_comments_post_id", "post_id"),
        Index::plain("idx_comments_pending", "is_processed, is_deleted"),
    ],
    unique_constraints: &[],
};

const SKILLS_TABLE_V1: Table = Table {
    name: "skills",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("description", &SqlType::Text),
        sqlite_column!("embedding", &SqlType::Blob),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[],
    unique_constraints: &[],
};

/// Keyed by the owning user's id.
const PROFILES_TABLE_V1: Table = Table {
    name: "profiles",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("display_name", &SqlType::Text, non_null = true),
        sqlite_column!("user_interest_embedding", &SqlType::Blob),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[],
    unique_constraints: &[],
};

const TAGS_TABLE_V1: Table = Table {
    name: "tags",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "english_name",
            &SqlType::Text,
            non_null = true,
            is_unique = true
        ),
        sqlite_column!("arabic_name", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text, non_null = true),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[],
    unique_constraints: &[],
};

const TAG_FK: ForeignKey = ForeignKey {
    foreign_table: "tags",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const PROFILE_FK: ForeignKey = ForeignKey {
    foreign_table: "profiles",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const CONTENT_TAGS_TABLE_V1: Table = Table {
    name: "content_tags",
    columns: &[
        sqlite_column!("content_id", &SqlType::Text, non_null = true),
        sqlite_column!("content_type", &SqlType::Text, non_null = true),
        sqlite_column!(
            "tag_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&TAG_FK)
        ),
    ],
    indices: &[],
    unique_constraints: &[&["content_id", "content_type", "tag_id"]],
};

const PROFILE_INTERESTS_TABLE_V1: Table = Table {
    name: "profile_interests",
    columns: &[
        sqlite_column!(
            "profile_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&PROFILE_FK)
        ),
        sqlite_column!(
            "tag_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&TAG_FK)
        ),
    ],
    indices: &[],
    unique_constraints: &[&["profile_id", "tag_id"]],
};

const MODERATION_REPORTS_TABLE_V1: Table = Table {
    name: "moderation_reports",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("content_id", &SqlType::Text, non_null = true),
        sqlite_column!("content_type", &SqlType::Text, non_null = true),
        sqlite_column!("author_id", &SqlType::Text),
        sqlite_column!("toxicity", &SqlType::Real, non_null = true),
        sqlite_column!("severe_toxicity", &SqlType::Real, non_null = true),
        sqlite_column!("obscene", &SqlType::Real, non_null = true),
        sqlite_column!("threat", &SqlType::Real, non_null = true),
        sqlite_column!("insult", &SqlType::Real, non_null = true),
        sqlite_column!("identity_attack", &SqlType::Real, non_null = true),
        sqlite_column!("sexual_explicit", &SqlType::Real, non_null = true),
        sqlite_column!("reported_by", &SqlType::Text, non_null = true),
        sqlite_column!("reason", &SqlType::Text, non_null = true),
        sqlite_column!(
            "is_resolved",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "is_negative",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[
        Index::plain(
            "idx_moderation_reports_content",
            "content_id, content_type",
        ),
        // At most one open AI report per content item
        Index {
            name: "idx_moderation_reports_open_ai",
            columns: "content_id, content_type",
            unique: true,
            predicate: Some("reported_by = 'ai' AND is_resolved = 0"),
        },
    ],
    unique_constraints: &[],
};

// =============================================================================
// Version 2 - Notifications
// =============================================================================

const NOTIFICATIONS_TABLE_V2: Table = Table {
    name: "notifications",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("user_id", &SqlType::Text, non_null = true),
        sqlite_column!("notification_type", &SqlType::Text, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("body", &SqlType::Text),
        sqlite_column!("data", &SqlType::Text, non_null = true),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!("read_at", &SqlType::Integer),
    ],
    indices: &[Index::plain(
        "idx_notifications_user",
        "user_id, created_at DESC",
    )],
    unique_constraints: &[],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    NOTIFICATIONS_TABLE_V2.create(conn)
}

/// All versioned schemas for the content database.
///
/// Version 1: posts, job postings, comments, skills, profiles, tags, moderation reports
/// Version 2: notifications
pub const CONTENT_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[
            POSTS_TABLE_V1,
            JOB_POSTINGS_TABLE_V1,
            COMMENTS_TABLE_V1,
            SKILLS_TABLE_V1,
            PROFILES_TABLE_V1,
            TAGS_TABLE_V1,
            CONTENT_TAGS_TABLE_V1,
            PROFILE_INTERESTS_TABLE_V1,
            MODERATION_REPORTS_TABLE_V1,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            POSTS_TABLE_V1,
            JOB_POSTINGS_TABLE_V1,
            COMMENTS_TABLE_V1,
            SKILLS_TABLE_V1,
            PROFILES_TABLE_V1,
            TAGS_TABLE_V1,
            CONTENT_TAGS_TABLE_V1,
            PROFILE_INTERESTS_TABLE_V1,
            MODERATION_REPORTS_TABLE_V1,
            NOTIFICATIONS_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_latest_schema_creates_and_validates() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = CONTENT_VERSIONED_SCHEMAS.last().unwrap();
        schema.create(&conn).unwrap();
        schema.validate(&conn).unwrap();
    }

    #[test]
    fn test_migration_v1_to_v2() {
        let conn = Connection::open_in_memory().unwrap();
        CONTENT_VERSIONED_SCHEMAS[0].create(&conn).unwrap();

        let migrate = CONTENT_VERSIONED_SCHEMAS[1].migration.unwrap();
        migrate(&conn).unwrap();

        CONTENT_VERSIONED_SCHEMAS[1].validate(&conn).unwrap();
    }

    #[test]
    fn test_open_ai_report_index_rejects_second_unresolved_report() {
        let conn = Connection::open_in_memory().unwrap();
        CONTENT_VERSIONED_SCHEMAS.last().unwrap().create(&conn).unwrap();

        let insert = |id: &str, reported_by: &str, resolved: i32| {
            conn.execute(
                "INSERT INTO moderation_reports (id, content_id, content_type, toxicity, severe_toxicity,
                    obscene, threat, insult, identity_attack, sexual_explicit, reported_by, reason, is_resolved)
                 VALUES (?1, 'p1', 'post', 0, 0, 0, 0, 0, 0, 0, ?2, 'r', ?3)",
                rusqlite::params![id, reported_by, resolved],
            )
        };

        insert("r1", "ai", 0).unwrap();
        // Resolved AI reports and user reports are not constrained
        insert("r2", "ai", 1).unwrap();
        insert("r3", "user", 0).unwrap();
        assert!(insert("r4", "ai", 0).is_err());
    }
}

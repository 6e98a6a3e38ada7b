mod versioned_schema;

pub use versioned_schema::{
    read_schema_version, Column, ForeignKey, ForeignKeyOnChange, Index, SqlType, Table,
    VersionedSchema, BASE_DB_VERSION,
};

/// Default value expression for timestamp columns, seconds since epoch.
pub const DEFAULT_TIMESTAMP: &str = "(cast(strftime('%s','now') as int))";

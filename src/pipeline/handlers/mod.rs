mod embedding;
mod moderation;
mod tagging;

pub use embedding::EmbeddingHandler;
pub use moderation::ModerationHandler;
pub use tagging::TaggingHandler;

pub mod openai;
pub mod pinecone;
pub mod sqlite;

pub use openai::OpenAiClient;
pub use pinecone::PineconeStore;
pub use sqlite::{SessionSummary, SqliteStore};

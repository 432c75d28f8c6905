pub mod chat_store;
pub mod db;
pub mod oracle_llm;

pub use chat_store::FileChatStore;
pub use db::DbAdapter;
pub use oracle_llm::OpenAiPerspectiveAdapter;

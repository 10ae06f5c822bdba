pub mod chat_llm;
pub mod db;
pub mod media;
pub mod talks;

pub use chat_llm::OpenAiChatAdapter;
pub use db::PgStore;
pub use media::{CloudMediaRelay, ImgurHost};
pub use talks::TalksAdapter;

pub mod auth;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;

pub use middleware::require_auth;
pub use rest::{
    character_setting_handler, chat_history_handler, choose_partner_handler,
    generate_partner_image_handler, get_image_url_handler, idle_video_handler,
    reply_message_handler, upload_image_handler, user_status_handler, ApiDoc,
};

pub mod conversation;
pub mod domain;
pub mod ports;
pub mod provisioning;

#[cfg(test)]
pub(crate) mod testing;

pub use conversation::{render_system_prompt, ConversationManager, CONTEXT_WINDOW};
pub use domain::{
    AuthSession, Chat, ChatMessage, Image, ImageCard, ImageFilter, Partner, PersonaAttributes,
    User, UserCredentials,
};
pub use ports::{
    AssetStore, ChatModelService, ImageHostService, MediaRelayService, PortError, PortResult,
    TalkScript, TalkStatus, VideoJobService,
};
pub use provisioning::{
    idle_script, PartnerProvisioner, PollPolicy, CANDIDATE_SAMPLE_SIZE,
};

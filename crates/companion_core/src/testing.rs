//! crates/companion_core/src/testing.rs
//!
//! In-memory fakes for the service ports, shared by the unit tests of the
//! conversation manager and the provisioning orchestrator.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    AuthSession, Chat, ChatMessage, Image, ImageCard, ImageFilter, Partner, PersonaAttributes,
    User, UserCredentials,
};
use crate::ports::{
    AssetStore, ChatModelService, ImageHostService, MediaRelayService, PortError, PortResult,
    TalkScript, TalkStatus, VideoJobService,
};

pub fn persona(nickname: &str, name: &str) -> PersonaAttributes {
    PersonaAttributes {
        nickname: nickname.to_string(),
        name: name.to_string(),
        mbti: "INFJ".to_string(),
        job: "engineer".to_string(),
        personality: "gentle".to_string(),
    }
}

pub fn blank_image(id: Uuid) -> Image {
    Image {
        id,
        img_base64: "aGVsbG8=".to_string(),
        img_url: None,
        video_id: None,
        video_url: None,
        origin: None,
        hair: None,
        hair_color: None,
        breast: None,
        glasses: None,
    }
}

//=========================================================================================
// MemoryStore
//=========================================================================================

#[derive(Default)]
struct StoreInner {
    users: Vec<UserCredentials>,
    sessions: HashMap<String, AuthSession>,
    images: HashMap<Uuid, Image>,
    partners: HashMap<Uuid, Partner>,
    chats: HashMap<Uuid, Chat>,
}

/// An in-memory [`AssetStore`] with the same uniqueness and populate-once
/// semantics as the real store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_image(&self, image: Image) {
        self.inner.lock().unwrap().images.insert(image.id, image);
    }
}

fn matches(filter: &ImageFilter, image: &Image) -> bool {
    fn field_ok(wanted: &Option<String>, actual: &Option<String>) -> bool {
        match wanted {
            None => true,
            Some(w) => actual.as_deref() == Some(w.as_str()),
        }
    }
    field_ok(&filter.origin, &image.origin)
        && field_ok(&filter.hair, &image.hair)
        && field_ok(&filter.hair_color, &image.hair_color)
        && field_ok(&filter.breast, &image.breast)
        && field_ok(&filter.glasses, &image.glasses)
}

#[async_trait]
impl AssetStore for MemoryStore {
    async fn create_user(
        &self,
        username: &str,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User> {
        let mut inner = self.inner.lock().unwrap();
        if inner.users.iter().any(|u| u.username == username) {
            return Err(PortError::Conflict(format!("user {username} already exists")));
        }
        let creds = UserCredentials {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            hashed_password: hashed_password.to_string(),
        };
        inner.users.push(creds.clone());
        Ok(User {
            id: creds.id,
            username: creds.username,
            email: creds.email,
        })
    }

    async fn get_user_by_username(&self, username: &str) -> PortResult<UserCredentials> {
        self.inner
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("user {username} not found")))
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.inner.lock().unwrap().sessions.insert(
            session_id.to_string(),
            AuthSession {
                id: session_id.to_string(),
                user_id,
                expires_at,
            },
        );
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let inner = self.inner.lock().unwrap();
        match inner.sessions.get(session_id) {
            Some(s) if s.expires_at > Utc::now() => Ok(s.user_id),
            _ => Err(PortError::Unauthorized),
        }
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.inner.lock().unwrap().sessions.remove(session_id);
        Ok(())
    }

    async fn get_image_by_id(&self, image_id: Uuid) -> PortResult<Image> {
        self.inner
            .lock()
            .unwrap()
            .images
            .get(&image_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("image {image_id} not found")))
    }

    async fn insert_image(&self, image: Image) -> PortResult<Image> {
        let mut inner = self.inner.lock().unwrap();
        inner.images.insert(image.id, image.clone());
        Ok(image)
    }

    async fn sample_images(
        &self,
        filter: &ImageFilter,
        sample_size: usize,
    ) -> PortResult<Vec<ImageCard>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .images
            .values()
            .filter(|img| matches(filter, img))
            .take(sample_size)
            .map(|img| ImageCard {
                image_id: img.id,
                img_base64: img.img_base64.clone(),
            })
            .collect())
    }

    async fn set_image_url_once(&self, image_id: Uuid, img_url: &str) -> PortResult<String> {
        let mut inner = self.inner.lock().unwrap();
        let image = inner
            .images
            .get_mut(&image_id)
            .ok_or_else(|| PortError::NotFound(format!("image {image_id} not found")))?;
        Ok(image
            .img_url
            .get_or_insert_with(|| img_url.to_string())
            .clone())
    }

    async fn set_image_video_id_once(
        &self,
        image_id: Uuid,
        video_id: &str,
    ) -> PortResult<String> {
        let mut inner = self.inner.lock().unwrap();
        let image = inner
            .images
            .get_mut(&image_id)
            .ok_or_else(|| PortError::NotFound(format!("image {image_id} not found")))?;
        Ok(image
            .video_id
            .get_or_insert_with(|| video_id.to_string())
            .clone())
    }

    async fn set_image_video_url_once(
        &self,
        image_id: Uuid,
        video_url: &str,
    ) -> PortResult<String> {
        let mut inner = self.inner.lock().unwrap();
        let image = inner
            .images
            .get_mut(&image_id)
            .ok_or_else(|| PortError::NotFound(format!("image {image_id} not found")))?;
        Ok(image
            .video_url
            .get_or_insert_with(|| video_url.to_string())
            .clone())
    }

    async fn upsert_partner(&self, user_id: Uuid, image_id: Uuid) -> PortResult<Partner> {
        let mut inner = self.inner.lock().unwrap();
        let partner = inner.partners.entry(user_id).or_insert_with(|| Partner {
            id: Uuid::new_v4(),
            user_id,
            image_id,
            nickname: None,
            name: None,
            mbti: None,
            job: None,
            personality: None,
        });
        partner.image_id = image_id;
        Ok(partner.clone())
    }

    async fn get_partner_by_user(&self, user_id: Uuid) -> PortResult<Partner> {
        self.inner
            .lock()
            .unwrap()
            .partners
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("partner for user {user_id} not found")))
    }

    async fn update_partner_persona(
        &self,
        user_id: Uuid,
        persona: &PersonaAttributes,
    ) -> PortResult<Partner> {
        let mut inner = self.inner.lock().unwrap();
        let partner = inner
            .partners
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("partner for user {user_id} not found")))?;
        partner.nickname = Some(persona.nickname.clone());
        partner.name = Some(persona.name.clone());
        partner.mbti = Some(persona.mbti.clone());
        partner.job = Some(persona.job.clone());
        partner.personality = Some(persona.personality.clone());
        Ok(partner.clone())
    }

    async fn ensure_chat(&self, user_id: Uuid) -> PortResult<Chat> {
        let mut inner = self.inner.lock().unwrap();
        let chat = inner.chats.entry(user_id).or_insert_with(|| Chat {
            id: Uuid::new_v4(),
            user_id,
            system: None,
            messages: Vec::new(),
        });
        Ok(chat.clone())
    }

    async fn get_chat_by_user(&self, user_id: Uuid) -> PortResult<Chat> {
        self.inner
            .lock()
            .unwrap()
            .chats
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("chat for user {user_id} not found")))
    }

    async fn append_chat_message(
        &self,
        user_id: Uuid,
        message: &ChatMessage,
    ) -> PortResult<Chat> {
        let mut inner = self.inner.lock().unwrap();
        let chat = inner
            .chats
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("chat for user {user_id} not found")))?;
        chat.messages.push(message.clone());
        Ok(chat.clone())
    }

    async fn set_chat_system(&self, user_id: Uuid, system: &str) -> PortResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let chat = inner.chats.entry(user_id).or_insert_with(|| Chat {
            id: Uuid::new_v4(),
            user_id,
            system: None,
            messages: Vec::new(),
        });
        chat.system = Some(system.to_string());
        Ok(())
    }
}

//=========================================================================================
// ScriptedChatModel
//=========================================================================================

#[derive(Debug, Clone)]
pub struct ModelCall {
    pub system: Option<String>,
    pub window: Vec<ChatMessage>,
}

/// A chat model fake that records every call and answers with a fixed reply.
pub struct ScriptedChatModel {
    reply: Option<String>,
    calls: Mutex<Vec<ModelCall>>,
}

impl ScriptedChatModel {
    pub fn replying(content: &str) -> Self {
        Self {
            reply: Some(content.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ModelCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModelService for ScriptedChatModel {
    async fn complete(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
    ) -> PortResult<ChatMessage> {
        self.calls.lock().unwrap().push(ModelCall {
            system: system.map(str::to_string),
            window: messages.to_vec(),
        });
        match &self.reply {
            Some(content) => Ok(ChatMessage::new("assistant", content.clone())),
            None => Err(PortError::Upstream("chat model unavailable".to_string())),
        }
    }
}

//=========================================================================================
// FakeTalks / FakeRelay / FakeHost
//=========================================================================================

/// A talk-job fake driven by a scripted sequence of status responses.
pub struct FakeTalks {
    job_id: String,
    submits: Mutex<Vec<(String, TalkScript)>>,
    statuses: Mutex<VecDeque<PortResult<TalkStatus>>>,
    polls: Mutex<usize>,
}

impl FakeTalks {
    /// Reports "in progress" `pending` times, then done with `result_url`.
    pub fn done_after(job_id: &str, pending: usize, result_url: &str) -> Self {
        let mut statuses: VecDeque<PortResult<TalkStatus>> = VecDeque::new();
        for _ in 0..pending {
            statuses.push_back(Ok(TalkStatus {
                done: false,
                result_url: None,
            }));
        }
        statuses.push_back(Ok(TalkStatus {
            done: true,
            result_url: Some(result_url.to_string()),
        }));
        Self {
            job_id: job_id.to_string(),
            submits: Mutex::new(Vec::new()),
            statuses: Mutex::new(statuses),
            polls: Mutex::new(0),
        }
    }

    /// Never reaches the terminal state; every poll reports "in progress".
    pub fn never_done(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            submits: Mutex::new(Vec::new()),
            statuses: Mutex::new(VecDeque::new()),
            polls: Mutex::new(0),
        }
    }

    /// Fails the first status poll, then behaves like `done_after(0, url)`.
    pub fn failing_once_then_done(job_id: &str, result_url: &str) -> Self {
        let mut statuses: VecDeque<PortResult<TalkStatus>> = VecDeque::new();
        statuses.push_back(Err(PortError::Upstream("status endpoint unavailable".into())));
        statuses.push_back(Ok(TalkStatus {
            done: true,
            result_url: Some(result_url.to_string()),
        }));
        Self {
            job_id: job_id.to_string(),
            submits: Mutex::new(Vec::new()),
            statuses: Mutex::new(statuses),
            polls: Mutex::new(0),
        }
    }

    pub fn submit_count(&self) -> usize {
        self.submits.lock().unwrap().len()
    }

    pub fn submitted_scripts(&self) -> Vec<TalkScript> {
        self.submits
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn poll_count(&self) -> usize {
        *self.polls.lock().unwrap()
    }
}

#[async_trait]
impl VideoJobService for FakeTalks {
    async fn submit_talk(&self, source_url: &str, script: &TalkScript) -> PortResult<String> {
        self.submits
            .lock()
            .unwrap()
            .push((source_url.to_string(), script.clone()));
        Ok(self.job_id.clone())
    }

    async fn talk_status(&self, _job_id: &str) -> PortResult<TalkStatus> {
        *self.polls.lock().unwrap() += 1;
        match self.statuses.lock().unwrap().pop_front() {
            Some(status) => status,
            None => Ok(TalkStatus {
                done: false,
                result_url: None,
            }),
        }
    }
}

/// Media relay fake: records inputs, returns a fixed durable URL.
pub struct FakeRelay {
    durable_url: String,
    calls: Mutex<Vec<String>>,
}

impl FakeRelay {
    pub fn new(durable_url: &str) -> Self {
        Self {
            durable_url: durable_url.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaRelayService for FakeRelay {
    async fn persist_video(&self, transient_url: &str) -> PortResult<String> {
        self.calls.lock().unwrap().push(transient_url.to_string());
        Ok(self.durable_url.clone())
    }
}

/// Image host fake: records payloads, returns a fixed public URL.
pub struct FakeHost {
    public_url: String,
    calls: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn new(public_url: &str) -> Self {
        Self {
            public_url: public_url.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageHostService for FakeHost {
    async fn host_image(&self, img_base64: &str) -> PortResult<String> {
        self.calls.lock().unwrap().push(img_base64.to_string());
        Ok(self.public_url.clone())
    }
}

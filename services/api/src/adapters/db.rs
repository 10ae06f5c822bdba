//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `AssetStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use companion_core::domain::{
    Chat, ChatMessage, Image, ImageCard, ImageFilter, Partner, PersonaAttributes, User,
    UserCredentials,
};
use companion_core::ports::{AssetStore, PortError, PortResult};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `AssetStore` port.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new `PgStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Maps database failures onto the port taxonomy. Unique-key violations
/// surface as `Conflict` so callers can treat them as client-correctable.
fn store_err(e: sqlx::Error) -> PortError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            PortError::Conflict(db.to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    email: String,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            id: self.id,
            username: self.username,
            email: self.email,
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    id: Uuid,
    username: String,
    email: String,
    hashed_password: String,
}
impl CredentialsRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            id: self.id,
            username: self.username,
            email: self.email,
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct ImageRecord {
    id: Uuid,
    img_base64: String,
    img_url: Option<String>,
    video_id: Option<String>,
    video_url: Option<String>,
    origin: Option<String>,
    hair: Option<String>,
    hair_color: Option<String>,
    breast: Option<String>,
    glasses: Option<String>,
}
impl ImageRecord {
    fn to_domain(self) -> Image {
        Image {
            id: self.id,
            img_base64: self.img_base64,
            img_url: self.img_url,
            video_id: self.video_id,
            video_url: self.video_url,
            origin: self.origin,
            hair: self.hair,
            hair_color: self.hair_color,
            breast: self.breast,
            glasses: self.glasses,
        }
    }
}

#[derive(FromRow)]
struct ImageCardRecord {
    id: Uuid,
    img_base64: String,
}
impl ImageCardRecord {
    fn to_domain(self) -> ImageCard {
        ImageCard {
            image_id: self.id,
            img_base64: self.img_base64,
        }
    }
}

#[derive(FromRow)]
struct PartnerRecord {
    id: Uuid,
    user_id: Uuid,
    image_id: Uuid,
    nickname: Option<String>,
    name: Option<String>,
    mbti: Option<String>,
    job: Option<String>,
    personality: Option<String>,
}
impl PartnerRecord {
    fn to_domain(self) -> Partner {
        Partner {
            id: self.id,
            user_id: self.user_id,
            image_id: self.image_id,
            nickname: self.nickname,
            name: self.name,
            mbti: self.mbti,
            job: self.job,
            personality: self.personality,
        }
    }
}

#[derive(FromRow)]
struct ChatRecord {
    id: Uuid,
    user_id: Uuid,
    system_prompt: Option<String>,
    messages: Json<Vec<ChatMessage>>,
}
impl ChatRecord {
    fn to_domain(self) -> Chat {
        Chat {
            id: self.id,
            user_id: self.user_id,
            system: self.system_prompt,
            messages: self.messages.0,
        }
    }
}

//=========================================================================================
// `AssetStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AssetStore for PgStore {
    async fn create_user(
        &self,
        username: &str,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (id, username, email, hashed_password) VALUES ($1, $2, $3, $4) \
             RETURNING id, username, email",
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(email)
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(record.to_domain())
    }

    async fn get_user_by_username(&self, username: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT id, username, email, hashed_password FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", username)))?;
        Ok(record.to_domain())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > NOW()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(|(user_id,)| user_id).ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn get_image_by_id(&self, image_id: Uuid) -> PortResult<Image> {
        let record = sqlx::query_as::<_, ImageRecord>(
            "SELECT id, img_base64, img_url, video_id, video_url, origin, hair, hair_color, \
             breast, glasses FROM images WHERE id = $1",
        )
        .bind(image_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?
        .ok_or_else(|| PortError::NotFound(format!("Image {} not found", image_id)))?;
        Ok(record.to_domain())
    }

    async fn insert_image(&self, image: Image) -> PortResult<Image> {
        let record = sqlx::query_as::<_, ImageRecord>(
            "INSERT INTO images (id, img_base64, img_url, video_id, video_url, origin, hair, \
             hair_color, breast, glasses) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING id, img_base64, img_url, video_id, video_url, origin, hair, hair_color, \
             breast, glasses",
        )
        .bind(image.id)
        .bind(&image.img_base64)
        .bind(&image.img_url)
        .bind(&image.video_id)
        .bind(&image.video_url)
        .bind(&image.origin)
        .bind(&image.hair)
        .bind(&image.hair_color)
        .bind(&image.breast)
        .bind(&image.glasses)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(record.to_domain())
    }

    async fn sample_images(
        &self,
        filter: &ImageFilter,
        sample_size: usize,
    ) -> PortResult<Vec<ImageCard>> {
        let records = sqlx::query_as::<_, ImageCardRecord>(
            "SELECT id, img_base64 FROM images \
             WHERE ($1::text IS NULL OR origin = $1) \
               AND ($2::text IS NULL OR hair = $2) \
               AND ($3::text IS NULL OR hair_color = $3) \
               AND ($4::text IS NULL OR breast = $4) \
               AND ($5::text IS NULL OR glasses = $5) \
             ORDER BY random() LIMIT $6",
        )
        .bind(&filter.origin)
        .bind(&filter.hair)
        .bind(&filter.hair_color)
        .bind(&filter.breast)
        .bind(&filter.glasses)
        .bind(sample_size as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn set_image_url_once(&self, image_id: Uuid, img_url: &str) -> PortResult<String> {
        // COALESCE keeps the first written value; the stored URL is returned
        // so racing writers all observe the winner.
        let row: Option<(String,)> = sqlx::query_as(
            "UPDATE images SET img_url = COALESCE(img_url, $2) WHERE id = $1 RETURNING img_url",
        )
        .bind(image_id)
        .bind(img_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(|(url,)| url)
            .ok_or_else(|| PortError::NotFound(format!("Image {} not found", image_id)))
    }

    async fn set_image_video_id_once(
        &self,
        image_id: Uuid,
        video_id: &str,
    ) -> PortResult<String> {
        let row: Option<(String,)> = sqlx::query_as(
            "UPDATE images SET video_id = COALESCE(video_id, $2) WHERE id = $1 RETURNING video_id",
        )
        .bind(image_id)
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(|(id,)| id)
            .ok_or_else(|| PortError::NotFound(format!("Image {} not found", image_id)))
    }

    async fn set_image_video_url_once(
        &self,
        image_id: Uuid,
        video_url: &str,
    ) -> PortResult<String> {
        let row: Option<(String,)> = sqlx::query_as(
            "UPDATE images SET video_url = COALESCE(video_url, $2) WHERE id = $1 \
             RETURNING video_url",
        )
        .bind(image_id)
        .bind(video_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(|(url,)| url)
            .ok_or_else(|| PortError::NotFound(format!("Image {} not found", image_id)))
    }

    async fn upsert_partner(&self, user_id: Uuid, image_id: Uuid) -> PortResult<Partner> {
        let record = sqlx::query_as::<_, PartnerRecord>(
            "INSERT INTO partners (id, user_id, image_id) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id) DO UPDATE SET image_id = EXCLUDED.image_id \
             RETURNING id, user_id, image_id, nickname, name, mbti, job, personality",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(image_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(record.to_domain())
    }

    async fn get_partner_by_user(&self, user_id: Uuid) -> PortResult<Partner> {
        let record = sqlx::query_as::<_, PartnerRecord>(
            "SELECT id, user_id, image_id, nickname, name, mbti, job, personality \
             FROM partners WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?
        .ok_or_else(|| PortError::NotFound(format!("Partner for user {} not found", user_id)))?;
        Ok(record.to_domain())
    }

    async fn update_partner_persona(
        &self,
        user_id: Uuid,
        persona: &PersonaAttributes,
    ) -> PortResult<Partner> {
        let record = sqlx::query_as::<_, PartnerRecord>(
            "UPDATE partners SET nickname = $2, name = $3, mbti = $4, job = $5, personality = $6 \
             WHERE user_id = $1 \
             RETURNING id, user_id, image_id, nickname, name, mbti, job, personality",
        )
        .bind(user_id)
        .bind(&persona.nickname)
        .bind(&persona.name)
        .bind(&persona.mbti)
        .bind(&persona.job)
        .bind(&persona.personality)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?
        .ok_or_else(|| PortError::NotFound(format!("Partner for user {} not found", user_id)))?;
        Ok(record.to_domain())
    }

    async fn ensure_chat(&self, user_id: Uuid) -> PortResult<Chat> {
        // Insert-then-fetch: the unique constraint on user_id makes racing
        // creations converge on a single row.
        sqlx::query(
            "INSERT INTO chats (id, user_id, messages) VALUES ($1, $2, '[]'::jsonb) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        self.get_chat_by_user(user_id).await
    }

    async fn get_chat_by_user(&self, user_id: Uuid) -> PortResult<Chat> {
        let record = sqlx::query_as::<_, ChatRecord>(
            "SELECT id, user_id, system_prompt, messages FROM chats WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?
        .ok_or_else(|| PortError::NotFound(format!("Chat for user {} not found", user_id)))?;
        Ok(record.to_domain())
    }

    async fn append_chat_message(
        &self,
        user_id: Uuid,
        message: &ChatMessage,
    ) -> PortResult<Chat> {
        let record = sqlx::query_as::<_, ChatRecord>(
            "UPDATE chats SET messages = messages || $2 WHERE user_id = $1 \
             RETURNING id, user_id, system_prompt, messages",
        )
        .bind(user_id)
        .bind(Json(message))
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?
        .ok_or_else(|| PortError::NotFound(format!("Chat for user {} not found", user_id)))?;
        Ok(record.to_domain())
    }

    async fn set_chat_system(&self, user_id: Uuid, system: &str) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO chats (id, user_id, system_prompt, messages) \
             VALUES ($1, $2, $3, '[]'::jsonb) \
             ON CONFLICT (user_id) DO UPDATE SET system_prompt = EXCLUDED.system_prompt",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(system)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}

//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use companion_core::domain::{ChatMessage, ImageFilter, PersonaAttributes};
use companion_core::ports::PortError;
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::web::protocol::ReplyRenderPayload;
use crate::web::state::AppState;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        user_status_handler,
        generate_partner_image_handler,
        choose_partner_handler,
        upload_image_handler,
        character_setting_handler,
        get_image_url_handler,
        reply_message_handler,
        idle_video_handler,
        chat_history_handler,
    ),
    components(
        schemas(
            UserStatusResponse,
            GenerateImageRequest,
            GenerateImageResponse,
            CandidateImage,
            ChoosePartnerRequest,
            UploadImageRequest,
            CharacterSettingRequest,
            PartnerResponse,
            ImageUrlResponse,
            ReplyRequest,
            IdleVideoResponse,
            ChatHistoryResponse,
            MessageDto,
            crate::web::protocol::ReplyRenderPayload,
            crate::web::protocol::RenderScript,
            crate::web::protocol::RenderProvider,
            crate::web::protocol::RenderConfig,
        )
    ),
    tags(
        (name = "Companion API", description = "API endpoints for partner selection and chat.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct UserStatusResponse {
    #[serde(rename = "userInfo")]
    user_info: UserInfo,
}

#[derive(Serialize, ToSchema)]
pub struct UserInfo {
    status: bool,
}

/// Optional tag filter for candidate sampling; absent fields match anything.
#[derive(Deserialize, ToSchema, Default)]
pub struct GenerateImageRequest {
    origin: Option<String>,
    hair: Option<String>,
    #[serde(rename = "hairColor")]
    hair_color: Option<String>,
    breast: Option<String>,
    glasses: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct GenerateImageResponse {
    images: Vec<CandidateImage>,
}

#[derive(Serialize, ToSchema)]
pub struct CandidateImage {
    #[serde(rename = "imageId")]
    image_id: Uuid,
    #[serde(rename = "imageBase64")]
    image_base64: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ChoosePartnerRequest {
    #[serde(rename = "imageId")]
    image_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
pub struct UploadImageRequest {
    #[serde(rename = "imageBase64")]
    image_base64: String,
}

#[derive(Deserialize, ToSchema)]
pub struct CharacterSettingRequest {
    nickname: String,
    name: String,
    #[serde(rename = "MBTI")]
    mbti: String,
    job: String,
    personality: String,
}

#[derive(Serialize, ToSchema)]
pub struct PartnerResponse {
    #[serde(rename = "partnerId")]
    partner_id: Uuid,
    #[serde(rename = "imageId")]
    image_id: Uuid,
    message: String,
}

#[derive(Serialize, ToSchema)]
pub struct ImageUrlResponse {
    #[serde(rename = "imgURL")]
    img_url: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct ReplyRequest {
    message: String,
}

#[derive(Serialize, ToSchema)]
pub struct IdleVideoResponse {
    #[serde(rename = "videoURL")]
    video_url: String,
}

#[derive(Serialize, ToSchema)]
pub struct ChatHistoryResponse {
    #[serde(rename = "chatHistory")]
    chat_history: Vec<MessageDto>,
}

#[derive(Serialize, ToSchema)]
pub struct MessageDto {
    role: String,
    content: String,
}

impl From<ChatMessage> for MessageDto {
    fn from(message: ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content,
        }
    }
}

/// Maps a port error onto the HTTP status contract. Upstream and internal
/// details are logged but not leaked to the client.
fn port_error_response(err: PortError) -> (StatusCode, String) {
    match err {
        PortError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        PortError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        PortError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
        PortError::Upstream(msg) => {
            error!("Upstream failure: {}", msg);
            (
                StatusCode::BAD_GATEWAY,
                "Upstream service failure, please retry".to_string(),
            )
        }
        PortError::Timeout(msg) => {
            error!("Upstream timeout: {}", msg);
            (
                StatusCode::GATEWAY_TIMEOUT,
                "Upstream operation timed out, please retry".to_string(),
            )
        }
        PortError::Unexpected(msg) => {
            error!("Internal error: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}

//=========================================================================================
// User Handlers
//=========================================================================================

/// Whether the logged-in user has selected a partner yet.
#[utoipa::path(
    get,
    path = "/user/status",
    responses(
        (status = 200, description = "Selection status", body = UserStatusResponse),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn user_status_handler(
    State(state): State<AppState>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let status = match state.store.get_partner_by_user(user_id).await {
        Ok(_) => true,
        Err(PortError::NotFound(_)) => false,
        Err(e) => return Err(port_error_response(e)),
    };
    Ok(Json(UserStatusResponse {
        user_info: UserInfo { status },
    }))
}

//=========================================================================================
// Partner Handlers
//=========================================================================================

/// Draw random candidate images matching an optional tag filter.
#[utoipa::path(
    post,
    path = "/partner/generateImage",
    request_body = GenerateImageRequest,
    responses(
        (status = 200, description = "Candidate images", body = GenerateImageResponse),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn generate_partner_image_handler(
    State(state): State<AppState>,
    Json(req): Json<GenerateImageRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let filter = ImageFilter {
        origin: req.origin,
        hair: req.hair,
        hair_color: req.hair_color,
        breast: req.breast,
        glasses: req.glasses,
    };

    let cards = state
        .provisioner
        .select_candidate_images(&filter)
        .await
        .map_err(port_error_response)?;

    let images = cards
        .into_iter()
        .map(|card| CandidateImage {
            image_id: card.image_id,
            image_base64: card.img_base64,
        })
        .collect();
    Ok(Json(GenerateImageResponse { images }))
}

/// Bind the chosen catalog image as the user's partner and provision its
/// idle video.
#[utoipa::path(
    post,
    path = "/partner",
    request_body = ChoosePartnerRequest,
    responses(
        (status = 201, description = "Partner bound", body = PartnerResponse),
        (status = 404, description = "Image not found"),
        (status = 502, description = "Provisioning failed; retry later")
    )
)]
pub async fn choose_partner_handler(
    State(state): State<AppState>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<ChoosePartnerRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let partner = state
        .provisioner
        .bind_partner(user_id, req.image_id)
        .await
        .map_err(port_error_response)?;

    // The partner stays bound even if provisioning fails below; a later
    // idle-video fetch retries the cache fill.
    state
        .provisioner
        .provision_idle_asset(req.image_id)
        .await
        .map_err(port_error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(PartnerResponse {
            partner_id: partner.id,
            image_id: partner.image_id,
            message: "Partner chosen".to_string(),
        }),
    ))
}

/// Bind a freshly uploaded image as the user's partner.
#[utoipa::path(
    post,
    path = "/partner/image",
    request_body = UploadImageRequest,
    responses(
        (status = 201, description = "Partner bound to uploaded image", body = PartnerResponse),
        (status = 502, description = "Hosting or provisioning failed; retry later")
    )
)]
pub async fn upload_image_handler(
    State(state): State<AppState>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<UploadImageRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let partner = state
        .provisioner
        .upload_original_image(user_id, req.image_base64)
        .await
        .map_err(port_error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(PartnerResponse {
            partner_id: partner.id,
            image_id: partner.image_id,
            message: "Partner chosen".to_string(),
        }),
    ))
}

/// Update the partner's persona and re-sync the chat's system prompt.
#[utoipa::path(
    post,
    path = "/partner/characterSetting",
    request_body = CharacterSettingRequest,
    responses(
        (status = 201, description = "Persona updated"),
        (status = 409, description = "No partner selected yet")
    )
)]
pub async fn character_setting_handler(
    State(state): State<AppState>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<CharacterSettingRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let persona = PersonaAttributes {
        nickname: req.nickname,
        name: req.name,
        mbti: req.mbti,
        job: req.job,
        personality: req.personality,
    };

    state
        .provisioner
        .apply_persona_attributes(user_id, &persona)
        .await
        .map_err(port_error_response)?;

    Ok((StatusCode::CREATED, "CharacterSetting success".to_string()))
}

//=========================================================================================
// Chat Handlers
//=========================================================================================

/// The hosted still-image URL of the user's partner.
#[utoipa::path(
    get,
    path = "/chat/imageURL",
    responses(
        (status = 200, description = "Image URL", body = ImageUrlResponse),
        (status = 404, description = "Partner not found")
    )
)]
pub async fn get_image_url_handler(
    State(state): State<AppState>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let partner = state
        .store
        .get_partner_by_user(user_id)
        .await
        .map_err(port_error_response)?;
    let image = state
        .store
        .get_image_by_id(partner.image_id)
        .await
        .map_err(port_error_response)?;
    Ok(Json(ImageUrlResponse {
        img_url: image.img_url,
    }))
}

/// Submit a chat message; the reply comes back wrapped in the rendering
/// payload consumed by the downstream speech/video renderer.
#[utoipa::path(
    post,
    path = "/chat",
    request_body = ReplyRequest,
    responses(
        (status = 200, description = "Rendering payload for the reply", body = ReplyRenderPayload),
        (status = 502, description = "Chat model unavailable; the message was stored")
    )
)]
pub async fn reply_message_handler(
    State(state): State<AppState>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<ReplyRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let reply = state
        .conversations
        .reply(user_id, &req.message)
        .await
        .map_err(port_error_response)?;
    Ok(Json(ReplyRenderPayload::for_reply(reply.content)))
}

/// The partner's cached idle-video URL, provisioned on first request.
#[utoipa::path(
    get,
    path = "/chat/idleVideo",
    responses(
        (status = 200, description = "Idle video URL", body = IdleVideoResponse),
        (status = 404, description = "Partner not found"),
        (status = 504, description = "Rendering did not finish in time; retry later")
    )
)]
pub async fn idle_video_handler(
    State(state): State<AppState>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let partner = state
        .store
        .get_partner_by_user(user_id)
        .await
        .map_err(port_error_response)?;

    // Cache hit returns immediately; otherwise this resumes or starts the
    // provisioning pipeline for the bound image.
    let video_url = state
        .provisioner
        .provision_idle_asset(partner.image_id)
        .await
        .map_err(port_error_response)?;
    Ok(Json(IdleVideoResponse { video_url }))
}

/// The full ordered conversation history.
#[utoipa::path(
    get,
    path = "/chat/history",
    responses(
        (status = 200, description = "Full message log", body = ChatHistoryResponse),
        (status = 404, description = "No chat exists for the user")
    )
)]
pub async fn chat_history_handler(
    State(state): State<AppState>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let history = state
        .conversations
        .history(user_id)
        .await
        .map_err(port_error_response)?;
    Ok(Json(ChatHistoryResponse {
        chat_history: history.into_iter().map(MessageDto::from).collect(),
    }))
}

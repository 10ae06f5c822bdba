//! crates/companion_core/src/provisioning.rs
//!
//! The partner provisioning orchestrator: binds a user to a catalog image,
//! lazily hosts the image, and drives the asynchronous talk-job pipeline
//! that produces the cached idle video for that image.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::conversation::ConversationManager;
use crate::domain::{Image, ImageCard, ImageFilter, Partner, PersonaAttributes};
use crate::ports::{
    AssetStore, ImageHostService, MediaRelayService, PortError, PortResult, TalkScript,
    VideoJobService,
};

/// Number of candidate images drawn per selection request.
pub const CANDIDATE_SAMPLE_SIZE: usize = 6;

/// The scripted utterance used for idle videos: a long neutral pause, so the
/// rendered loop shows the partner sitting still.
pub fn idle_script() -> TalkScript {
    TalkScript {
        input: r#"<break time="1000ms"/>"#.repeat(15),
        ssml: true,
    }
}

/// Backoff and deadline settings for the talk-job status poll.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(8),
            deadline: Duration::from_secs(120),
        }
    }
}

/// Async mutexes keyed by image id, so concurrent provisioning attempts for
/// the same image serialize instead of submitting duplicate jobs.
#[derive(Default)]
struct ImageLocks {
    inner: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ImageLocks {
    async fn acquire(&self, image_id: Uuid) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(image_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Binds users to images as their partner and guarantees that image hosting
/// and idle-video assets exist, without redoing expensive work.
pub struct PartnerProvisioner {
    store: Arc<dyn AssetStore>,
    jobs: Arc<dyn VideoJobService>,
    relay: Arc<dyn MediaRelayService>,
    host: Arc<dyn ImageHostService>,
    conversations: ConversationManager,
    poll: PollPolicy,
    shutdown: CancellationToken,
    locks: ImageLocks,
}

impl PartnerProvisioner {
    pub fn new(
        store: Arc<dyn AssetStore>,
        jobs: Arc<dyn VideoJobService>,
        relay: Arc<dyn MediaRelayService>,
        host: Arc<dyn ImageHostService>,
        conversations: ConversationManager,
        poll: PollPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            jobs,
            relay,
            host,
            conversations,
            poll,
            shutdown,
            locks: ImageLocks::default(),
        }
    }

    /// Draws a random sample of candidate images matching the optional tag
    /// filter. May return fewer than the sample size if fewer images match.
    pub async fn select_candidate_images(
        &self,
        filter: &ImageFilter,
    ) -> PortResult<Vec<ImageCard>> {
        self.store
            .sample_images(filter, CANDIDATE_SAMPLE_SIZE)
            .await
    }

    /// Binds the user to the image as their partner. Re-selecting replaces
    /// the binding in place, keeping one partner per user.
    pub async fn bind_partner(&self, user_id: Uuid, image_id: Uuid) -> PortResult<Partner> {
        let image = self.store.get_image_by_id(image_id).await?;
        self.ensure_image_hosted(&image).await?;
        let partner = self.store.upsert_partner(user_id, image_id).await?;
        info!(%user_id, %image_id, "partner bound");
        Ok(partner)
    }

    /// Fills the idle-video cache for the image. A cache hit returns
    /// immediately without any external calls; otherwise the pipeline runs
    /// submit -> poll -> relay, checkpointing the job id so an interrupted
    /// run resumes by polling instead of resubmitting.
    pub async fn provision_idle_asset(&self, image_id: Uuid) -> PortResult<String> {
        let _guard = self.locks.acquire(image_id).await;

        let image = self.store.get_image_by_id(image_id).await?;
        if let Some(video_url) = &image.video_url {
            return Ok(video_url.clone());
        }

        let source_url = self.ensure_image_hosted(&image).await?;

        let video_id = match &image.video_id {
            Some(id) => id.clone(),
            None => {
                let id = self.jobs.submit_talk(&source_url, &idle_script()).await?;
                // Persist before polling: a crash between here and the final
                // write must not cause a duplicate submission on retry.
                let id = self.store.set_image_video_id_once(image_id, &id).await?;
                info!(%image_id, video_id = %id, "idle talk job submitted");
                id
            }
        };

        let transient_url = self.poll_until_done(&video_id).await?;
        let durable_url = self.relay.persist_video(&transient_url).await?;
        let stored = self
            .store
            .set_image_video_url_once(image_id, &durable_url)
            .await?;
        info!(%image_id, video_url = %stored, "idle video cached");
        Ok(stored)
    }

    /// For a user supplying their own image instead of picking from the
    /// catalog: hosts the payload, stores the image, then binds and
    /// provisions as usual.
    pub async fn upload_original_image(
        &self,
        user_id: Uuid,
        img_base64: String,
    ) -> PortResult<Partner> {
        let img_url = self.host.host_image(&img_base64).await?;
        let image = self
            .store
            .insert_image(Image {
                id: Uuid::new_v4(),
                img_base64,
                img_url: Some(img_url),
                video_id: None,
                video_url: None,
                origin: None,
                hair: None,
                hair_color: None,
                breast: None,
                glasses: None,
            })
            .await?;

        let partner = self.store.upsert_partner(user_id, image.id).await?;
        self.provision_idle_asset(image.id).await?;
        Ok(partner)
    }

    /// Updates the partner's persona fields and re-syncs the chat's system
    /// prompt so the two documents never diverge. Fails with `Conflict` when
    /// the user has no partner bound yet.
    pub async fn apply_persona_attributes(
        &self,
        user_id: Uuid,
        persona: &PersonaAttributes,
    ) -> PortResult<Partner> {
        match self.store.get_partner_by_user(user_id).await {
            Ok(_) => {}
            Err(PortError::NotFound(_)) => {
                return Err(PortError::Conflict(
                    "the user has not yet selected a partner".to_string(),
                ))
            }
            Err(e) => return Err(e),
        }

        let partner = self.store.update_partner_persona(user_id, persona).await?;
        self.conversations
            .sync_system_prompt(user_id, persona)
            .await?;
        Ok(partner)
    }

    /// Hosts the image's raw payload if no public URL exists yet; returns
    /// the durable URL either way. First writer wins.
    async fn ensure_image_hosted(&self, image: &Image) -> PortResult<String> {
        if let Some(url) = &image.img_url {
            return Ok(url.clone());
        }
        let url = self.host.host_image(&image.img_base64).await?;
        self.store.set_image_url_once(image.id, &url).await
    }

    /// Polls the talk job until it reports done, backing off exponentially
    /// under a hard deadline. Aborts promptly on shutdown.
    async fn poll_until_done(&self, video_id: &str) -> PortResult<String> {
        let deadline = Instant::now() + self.poll.deadline;
        let mut delay = self.poll.initial;

        loop {
            let status = self.jobs.talk_status(video_id).await?;
            if status.done {
                return status.result_url.ok_or_else(|| {
                    PortError::Upstream(format!(
                        "talk job {video_id} finished without a result URL"
                    ))
                });
            }

            if Instant::now() + delay > deadline {
                warn!(%video_id, "talk job poll deadline expired");
                return Err(PortError::Timeout(format!(
                    "talk job {video_id} did not finish within {:?}",
                    self.poll.deadline
                )));
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Err(PortError::Unexpected(
                        "provisioning aborted by shutdown".to_string(),
                    ));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(self.poll.max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::render_system_prompt;
    use crate::testing::{
        blank_image, persona, FakeHost, FakeRelay, FakeTalks, MemoryStore, ScriptedChatModel,
    };

    fn fast_poll() -> PollPolicy {
        PollPolicy {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(2),
            deadline: Duration::from_millis(50),
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        talks: Arc<FakeTalks>,
        relay: Arc<FakeRelay>,
        host: Arc<FakeHost>,
        provisioner: PartnerProvisioner,
    }

    fn fixture(talks: FakeTalks, poll: PollPolicy) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let talks = Arc::new(talks);
        let relay = Arc::new(FakeRelay::new("https://cdn.example/idle.mp4"));
        let host = Arc::new(FakeHost::new("https://img.example/a.png"));
        let conversations = ConversationManager::new(
            store.clone(),
            Arc::new(ScriptedChatModel::replying("ok")),
        );
        let provisioner = PartnerProvisioner::new(
            store.clone(),
            talks.clone(),
            relay.clone(),
            host.clone(),
            conversations,
            poll,
            CancellationToken::new(),
        );
        Fixture {
            store,
            talks,
            relay,
            host,
            provisioner,
        }
    }

    #[tokio::test]
    async fn cache_hit_makes_no_external_calls() {
        let fx = fixture(FakeTalks::done_after("talk-1", 0, "https://d-id/x.mp4"), fast_poll());
        let image_id = Uuid::new_v4();
        let mut image = blank_image(image_id);
        image.video_url = Some("https://cdn/x.mp4".to_string());
        fx.store.put_image(image);

        let url = fx.provisioner.provision_idle_asset(image_id).await.unwrap();

        assert_eq!(url, "https://cdn/x.mp4");
        assert_eq!(fx.talks.submit_count(), 0);
        assert_eq!(fx.talks.poll_count(), 0);
        assert_eq!(fx.relay.call_count(), 0);
        assert_eq!(fx.host.call_count(), 0);
    }

    #[tokio::test]
    async fn full_pipeline_hosts_submits_polls_and_relays() {
        let fx = fixture(
            FakeTalks::done_after("talk-1", 2, "https://d-id/result.mp4"),
            fast_poll(),
        );
        let image_id = Uuid::new_v4();
        fx.store.put_image(blank_image(image_id));

        let url = fx.provisioner.provision_idle_asset(image_id).await.unwrap();

        assert_eq!(url, "https://cdn.example/idle.mp4");
        assert_eq!(fx.host.call_count(), 1);
        assert_eq!(fx.talks.submit_count(), 1);
        assert_eq!(fx.talks.submitted_scripts(), vec![idle_script()]);
        assert_eq!(fx.talks.poll_count(), 3);
        assert_eq!(fx.relay.calls(), vec!["https://d-id/result.mp4".to_string()]);

        let image = fx.store.get_image_by_id(image_id).await.unwrap();
        assert_eq!(image.video_id.as_deref(), Some("talk-1"));
        assert_eq!(image.video_url.as_deref(), Some("https://cdn.example/idle.mp4"));

        // Second run is a pure cache hit.
        fx.provisioner.provision_idle_asset(image_id).await.unwrap();
        assert_eq!(fx.talks.submit_count(), 1);
        assert_eq!(fx.talks.poll_count(), 3);
        assert_eq!(fx.relay.call_count(), 1);
    }

    #[tokio::test]
    async fn idle_script_is_a_long_ssml_pause() {
        let script = idle_script();
        assert!(script.ssml);
        assert_eq!(script.input, r#"<break time="1000ms"/>"#.repeat(15));
    }

    #[tokio::test]
    async fn interrupted_run_resumes_from_the_checkpointed_job() {
        let fx = fixture(
            FakeTalks::failing_once_then_done("talk-1", "https://d-id/result.mp4"),
            fast_poll(),
        );
        let image_id = Uuid::new_v4();
        let mut image = blank_image(image_id);
        image.img_url = Some("https://img.example/a.png".to_string());
        fx.store.put_image(image);

        // First attempt submits, checkpoints the job id, then dies polling.
        let err = fx.provisioner.provision_idle_asset(image_id).await.unwrap_err();
        assert!(matches!(err, PortError::Upstream(_)));
        let image = fx.store.get_image_by_id(image_id).await.unwrap();
        assert_eq!(image.video_id.as_deref(), Some("talk-1"));
        assert_eq!(image.video_url, None);

        // The retry polls the stored job id and never submits again.
        let url = fx.provisioner.provision_idle_asset(image_id).await.unwrap();
        assert_eq!(url, "https://cdn.example/idle.mp4");
        assert_eq!(fx.talks.submit_count(), 1);
    }

    #[tokio::test]
    async fn pre_checkpointed_job_is_polled_without_resubmission() {
        let fx = fixture(FakeTalks::done_after("talk-9", 0, "https://d-id/r.mp4"), fast_poll());
        let image_id = Uuid::new_v4();
        let mut image = blank_image(image_id);
        image.img_url = Some("https://img.example/a.png".to_string());
        image.video_id = Some("talk-9".to_string());
        fx.store.put_image(image);

        let url = fx.provisioner.provision_idle_asset(image_id).await.unwrap();

        assert_eq!(url, "https://cdn.example/idle.mp4");
        assert_eq!(fx.talks.submit_count(), 0);
        assert_eq!(fx.talks.poll_count(), 1);
    }

    #[tokio::test]
    async fn poll_deadline_expiry_is_a_timeout() {
        let fx = fixture(FakeTalks::never_done("talk-1"), fast_poll());
        let image_id = Uuid::new_v4();
        fx.store.put_image(blank_image(image_id));

        let err = fx.provisioner.provision_idle_asset(image_id).await.unwrap_err();
        assert!(matches!(err, PortError::Timeout(_)));

        // The job id survived, so a later retry resumes the same job.
        let image = fx.store.get_image_by_id(image_id).await.unwrap();
        assert_eq!(image.video_id.as_deref(), Some("talk-1"));
    }

    #[tokio::test]
    async fn provisioning_a_missing_image_is_not_found() {
        let fx = fixture(FakeTalks::never_done("talk-1"), fast_poll());
        let err = fx
            .provisioner
            .provision_idle_asset(Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn binding_rebinds_in_place_and_hosts_the_image_once() {
        let fx = fixture(FakeTalks::done_after("talk-1", 0, "https://d-id/r.mp4"), fast_poll());
        let user_id = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        fx.store.put_image(blank_image(first));
        fx.store.put_image(blank_image(second));

        let a = fx.provisioner.bind_partner(user_id, first).await.unwrap();
        let b = fx.provisioner.bind_partner(user_id, second).await.unwrap();

        // One partner per user; re-selection re-points the binding.
        assert_eq!(a.id, b.id);
        assert_eq!(b.image_id, second);
        assert_eq!(fx.host.call_count(), 2);

        // Both images got their public URL populated.
        let image = fx.store.get_image_by_id(first).await.unwrap();
        assert_eq!(image.img_url.as_deref(), Some("https://img.example/a.png"));
    }

    #[tokio::test]
    async fn upload_original_image_binds_and_provisions() {
        let fx = fixture(FakeTalks::done_after("talk-1", 1, "https://d-id/r.mp4"), fast_poll());
        let user_id = Uuid::new_v4();

        let partner = fx
            .provisioner
            .upload_original_image(user_id, "cGF5bG9hZA==".to_string())
            .await
            .unwrap();

        assert_eq!(partner.user_id, user_id);
        let image = fx.store.get_image_by_id(partner.image_id).await.unwrap();
        assert_eq!(image.img_url.as_deref(), Some("https://img.example/a.png"));
        assert_eq!(image.video_url.as_deref(), Some("https://cdn.example/idle.mp4"));
        // The payload is hosted once; provisioning reuses the stored URL.
        assert_eq!(fx.host.call_count(), 1);
        assert_eq!(fx.talks.submit_count(), 1);
    }

    #[tokio::test]
    async fn persona_update_without_partner_is_a_conflict() {
        let fx = fixture(FakeTalks::never_done("talk-1"), fast_poll());
        let err = fx
            .provisioner
            .apply_persona_attributes(Uuid::new_v4(), &persona("寶貝", "艾莉"))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));
    }

    #[tokio::test]
    async fn persona_update_resyncs_the_system_prompt() {
        let fx = fixture(FakeTalks::done_after("talk-1", 0, "https://d-id/r.mp4"), fast_poll());
        let user_id = Uuid::new_v4();
        let image_id = Uuid::new_v4();
        fx.store.put_image(blank_image(image_id));
        fx.provisioner.bind_partner(user_id, image_id).await.unwrap();

        let attrs = persona("寶貝", "艾莉");
        let partner = fx
            .provisioner
            .apply_persona_attributes(user_id, &attrs)
            .await
            .unwrap();

        assert_eq!(partner.nickname.as_deref(), Some("寶貝"));
        let chat = fx.store.get_chat_by_user(user_id).await.unwrap();
        assert_eq!(chat.system.as_deref(), Some(render_system_prompt(&attrs).as_str()));
    }

    #[tokio::test]
    async fn sampling_honors_partial_filters() {
        let fx = fixture(FakeTalks::never_done("talk-1"), fast_poll());
        for i in 0..5 {
            let mut image = blank_image(Uuid::new_v4());
            image.origin = Some(if i < 3 { "Japanese" } else { "Korean" }.to_string());
            image.hair = Some("short".to_string());
            fx.store.put_image(image);
        }

        let filter = ImageFilter {
            origin: Some("Japanese".to_string()),
            ..Default::default()
        };
        let cards = fx.provisioner.select_candidate_images(&filter).await.unwrap();
        assert_eq!(cards.len(), 3);

        // An empty filter matches everything, bounded by the sample size.
        let all = fx
            .provisioner
            .select_candidate_images(&ImageFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn concurrent_provisioning_submits_a_single_job() {
        let fx = fixture(FakeTalks::done_after("talk-1", 1, "https://d-id/r.mp4"), fast_poll());
        let image_id = Uuid::new_v4();
        fx.store.put_image(blank_image(image_id));

        let provisioner = Arc::new(fx.provisioner);
        let (a, b) = tokio::join!(
            provisioner.provision_idle_asset(image_id),
            provisioner.provision_idle_asset(image_id),
        );

        assert_eq!(a.unwrap(), "https://cdn.example/idle.mp4");
        assert_eq!(b.unwrap(), "https://cdn.example/idle.mp4");
        assert_eq!(fx.talks.submit_count(), 1);
        assert_eq!(fx.relay.call_count(), 1);
    }
}

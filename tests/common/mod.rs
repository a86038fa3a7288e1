//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a full [`AppContext`] over a
//! temporary SQLite file and temporary storage directories, with a
//! [`ScriptedTranscoder`] standing in for ffmpeg. [`TestHarness::serve`]
//! starts Axum on a random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use tokio::sync::Notify;

use rf_av::{ToolRegistry, TranscodeReport, Transcoder};
use rf_core::config::Config;
use rf_core::{Role, TenantId, UserId, VideoId, VideoStatus};
use rf_db::models::Video;
use rf_db::pool::{init_pool, DbPool};
use rf_db::queries::{auth, organizations, users, videos};
use rf_server::context::AppContext;
use rf_server::router::build_router;

// ---------------------------------------------------------------------------
// ScriptedTranscoder
// ---------------------------------------------------------------------------

/// A [`Transcoder`] that reports a fixed list of percentages, then either
/// copies the input to the output or fails with a fixed message.
///
/// With a gate it waits for the [`Notify`] from [`ScriptedTranscoder::gated`] before doing
/// anything, which lets tests observe a video while it is `processing`.
pub struct ScriptedTranscoder {
    percents: Vec<f64>,
    failure: Option<String>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedTranscoder {
    /// Reports 0, 1, ..., 100 and succeeds.
    pub fn succeeding() -> Self {
        Self::reporting((0..=100).map(f64::from).collect())
    }

    pub fn reporting(percents: Vec<f64>) -> Self {
        Self {
            percents,
            failure: None,
            gate: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            percents: vec![2.0, 11.0],
            failure: Some(message.to_string()),
            gate: None,
        }
    }

    /// Hold every transcode until the returned handle is notified.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }
}

#[async_trait]
impl Transcoder for ScriptedTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        on_progress: &mut (dyn FnMut(f64) + Send),
    ) -> rf_core::Result<TranscodeReport> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        for p in &self.percents {
            on_progress(*p);
            tokio::task::yield_now().await;
        }

        if let Some(message) = &self.failure {
            tokio::fs::write(output, b"partial").await?;
            return Err(rf_core::Error::tool("ffmpeg", message.clone()));
        }

        let output_bytes = tokio::fs::copy(input, output).await?;
        Ok(TranscodeReport {
            output: output.to_path_buf(),
            duration_secs: Some(12.5),
            output_bytes,
        })
    }
}

// ---------------------------------------------------------------------------
// TestHarness
// ---------------------------------------------------------------------------

/// Test harness wrapping a fully-constructed [`AppContext`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub db: DbPool,
    pub dir: TempDir,
}

/// A user created directly in the store, with a live session token.
pub struct TestUser {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub token: String,
}

/// Configuration pointing every path into `dir`, with a cheap bcrypt cost.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.server.db_path = dir.join("reelforged.db");
    config.storage.upload_dir = dir.join("uploads");
    config.storage.processed_dir = dir.join("processed");
    config.auth.bcrypt_cost = 4;
    config.events.heartbeat_secs = 60;
    config
}

impl TestHarness {
    /// Default configuration and a transcoder that always succeeds.
    pub fn new() -> Self {
        Self::build(|_| {}, Arc::new(ScriptedTranscoder::succeeding()))
    }

    pub fn with_transcoder(transcoder: Arc<dyn Transcoder>) -> Self {
        Self::build(|_| {}, transcoder)
    }

    /// Adjust the configuration before the context is built.
    pub fn build(tweak: impl FnOnce(&mut Config), transcoder: Arc<dyn Transcoder>) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut config = test_config(dir.path());
        tweak(&mut config);

        std::fs::create_dir_all(&config.storage.upload_dir).unwrap();
        std::fs::create_dir_all(&config.storage.processed_dir).unwrap();

        let db = init_pool(&config.server.db_path.to_string_lossy()).expect("failed to open db");
        let ctx = AppContext::new(db.clone(), config, Arc::new(ToolRegistry::default()))
            .with_transcoder(transcoder);

        Self { ctx, db, dir }
    }

    /// Start an Axum server on a random port and return its base URL.
    pub async fn serve(&self) -> String {
        let app = build_router(self.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr: SocketAddr = listener.local_addr().expect("failed to get local addr");

        let shutdown = self.ctx.shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .ok();
        });

        format!("http://{addr}")
    }

    /// Get a database connection from the pool.
    pub fn conn(&self) -> rf_db::pool::PooledConnection {
        rf_db::pool::get_conn(&self.db).expect("failed to get db connection")
    }

    /// Create an organization.
    pub fn org(&self, name: &str) -> TenantId {
        organizations::create_organization(&self.conn(), name, None)
            .unwrap()
            .id
    }

    /// Create a user with `role` in `tenant_id` and give them a session.
    pub fn user(&self, tenant_id: TenantId, role: Role) -> TestUser {
        let conn = self.conn();
        let email = format!("{}@example.com", uuid::Uuid::new_v4());
        let user = users::create_user(&conn, tenant_id, "Test User", &email, "not-a-hash", role)
            .unwrap();
        let token = uuid::Uuid::new_v4().to_string();
        let expires = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        auth::create_token(&conn, user.id, &token, &expires).unwrap();
        TestUser {
            user_id: user.id,
            tenant_id,
            token,
        }
    }

    /// Insert an `uploaded` record whose original file holds `bytes`.
    pub fn seed_video(&self, owner: &TestUser, bytes: &[u8]) -> Video {
        let id = VideoId::new();
        let filename = format!("{id}.mp4");
        let path: PathBuf = self.ctx.config.storage.upload_dir.join(&filename);
        std::fs::write(&path, bytes).unwrap();

        videos::create_video(
            &self.conn(),
            &videos::NewVideo {
                id,
                tenant_id: owner.tenant_id,
                uploader_id: owner.user_id,
                original_name: "clip.mp4".into(),
                filename,
                mime_type: "video/mp4".into(),
                size_bytes: bytes.len() as i64,
                original_path: path.to_string_lossy().into_owned(),
            },
        )
        .unwrap()
    }

    pub fn video(&self, id: VideoId) -> Video {
        videos::get_video(&self.conn(), id).unwrap().expect("video exists")
    }

    /// Poll until `id` reaches a terminal status.
    pub async fn wait_terminal(&self, id: VideoId) -> Video {
        for _ in 0..500 {
            let v = self.video(id);
            if v.status.is_terminal() {
                return v;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("video {id} never reached a terminal status");
    }

    /// Poll until `id` is `processing`.
    pub async fn wait_processing(&self, id: VideoId) {
        for _ in 0..500 {
            if self.video(id).status == VideoStatus::Processing {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("video {id} never started processing");
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Multipart upload of `bytes` as the `video` field.
pub async fn upload(
    client: &reqwest::Client,
    base: &str,
    token: &str,
    file_name: &str,
    mime: &str,
    bytes: Vec<u8>,
) -> reqwest::Response {
    let part = reqwest::multipart::Part::bytes(bytes)
        .file_name(file_name.to_string())
        .mime_str(mime)
        .unwrap();
    let form = reqwest::multipart::Form::new().part("video", part);

    client
        .post(format!("{base}/api/videos"))
        .bearer_auth(token)
        .multipart(form)
        .send()
        .await
        .unwrap()
}

/// Register through the API; returns `(token, organization_id)`.
pub async fn register(
    client: &reqwest::Client,
    base: &str,
    body: serde_json::Value,
) -> (String, String) {
    let resp = client
        .post(format!("{base}/api/auth/register"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "registration failed");
    let json: serde_json::Value = resp.json().await.unwrap();
    (
        json["token"].as_str().unwrap().to_string(),
        json["user"]["organization_id"].as_str().unwrap().to_string(),
    )
}

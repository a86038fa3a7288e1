//! Per-video SSE progress feeds.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;

use common::{upload, ScriptedTranscoder, TestHarness};
use rf_core::Role;

/// One parsed SSE frame.
#[derive(Debug)]
struct Frame {
    event: String,
    data: Value,
}

/// Incremental SSE reader over a reqwest body.
struct SseReader {
    stream: futures::stream::BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    buf: String,
}

impl SseReader {
    fn new(resp: reqwest::Response) -> Self {
        Self {
            stream: resp.bytes_stream().boxed(),
            buf: String::new(),
        }
    }

    /// Next frame with a `data:` line, skipping comments; `None` once the
    /// body ends.
    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            while let Some(pos) = self.buf.find("\n\n") {
                let raw: String = self.buf.drain(..pos + 2).collect();
                let mut event = String::from("message");
                let mut data = None;
                for line in raw.lines() {
                    if let Some(v) = line.strip_prefix("event:") {
                        event = v.trim().to_string();
                    } else if let Some(v) = line.strip_prefix("data:") {
                        data = Some(v.trim().to_string());
                    }
                }
                if let Some(data) = data {
                    if let Ok(json) = serde_json::from_str(&data) {
                        return Some(Frame { event, data: json });
                    }
                }
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.buf.push_str(&String::from_utf8_lossy(&chunk)),
                _ => return None,
            }
        }
    }
}

async fn subscribe(base: &str, id: &str, token: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(format!("{base}/api/videos/{id}/events?access_token={token}"))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn subscriber_sees_progress_then_one_terminal_event() {
    let (transcoder, gate) = ScriptedTranscoder::succeeding().gated();
    let h = TestHarness::with_transcoder(Arc::new(transcoder));
    let base = h.serve().await;
    let client = reqwest::Client::new();
    let editor = h.user(h.org("Acme"), Role::Editor);

    let resp = upload(&client, &base, &editor.token, "clip.mp4", "video/mp4", vec![1u8; 2_048]).await;
    let body: Value = resp.json().await.unwrap();
    let id = body["id"].as_str().unwrap().to_string();

    let resp = subscribe(&base, &id, &editor.token).await;
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    // The subscription exists once headers are back; let the worker run.
    gate.notify_one();

    let mut reader = SseReader::new(resp);
    let mut progress = Vec::new();
    let mut terminal = Vec::new();
    while let Some(frame) = tokio::time::timeout(Duration::from_secs(10), reader.next_frame())
        .await
        .expect("event arrived")
    {
        if frame.event == "heartbeat" {
            continue;
        }
        assert_eq!(frame.data["video_id"], id);
        match frame.event.as_str() {
            "progress" => progress.push(frame.data["percent"].as_u64().unwrap()),
            "complete" | "failed" => terminal.push(frame.data),
            other => panic!("unexpected event {other}"),
        }
    }

    let expected: Vec<u64> = (1..=19).map(|i| i * 5).collect();
    assert_eq!(progress, expected);
    // The terminal event releases the topic.
    assert_eq!(h.ctx.hub.topic_count(), 0);
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0]["type"], "complete");
    assert_eq!(terminal[0]["status"], "completed");
    assert_eq!(terminal[0]["sensitivity"], "safe");
}

#[tokio::test]
async fn late_subscriber_gets_no_replay() {
    let h = TestHarness::new();
    let base = h.serve().await;
    let client = reqwest::Client::new();
    let editor = h.user(h.org("Acme"), Role::Editor);

    let resp = upload(&client, &base, &editor.token, "clip.mp4", "video/mp4", vec![1u8; 64]).await;
    let id = resp.json::<Value>().await.unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();
    h.wait_terminal(id.parse().unwrap()).await;

    let resp = subscribe(&base, &id, &editor.token).await;
    assert_eq!(resp.status(), 200);
    let mut reader = SseReader::new(resp);

    let next = tokio::time::timeout(Duration::from_millis(300), reader.next_frame()).await;
    assert!(next.is_err(), "late subscriber received a replayed event");
}

#[tokio::test]
async fn failure_is_pushed_to_subscribers() {
    let (transcoder, gate) = ScriptedTranscoder::failing("moov atom not found").gated();
    let h = TestHarness::with_transcoder(Arc::new(transcoder));
    let base = h.serve().await;
    let client = reqwest::Client::new();
    let editor = h.user(h.org("Acme"), Role::Editor);

    let resp = upload(&client, &base, &editor.token, "clip.mov", "video/quicktime", vec![1u8; 64]).await;
    let id = resp.json::<Value>().await.unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    let mut reader = SseReader::new(subscribe(&base, &id, &editor.token).await);
    gate.notify_one();

    let mut last = None;
    while let Some(frame) = tokio::time::timeout(Duration::from_secs(10), reader.next_frame())
        .await
        .expect("event arrived")
    {
        last = Some(frame);
    }
    let last = last.expect("at least one event");
    assert_eq!(last.event, "failed");
    assert!(last.data["error"].as_str().unwrap().contains("moov atom not found"));
}

#[tokio::test]
async fn foreign_tenant_sees_not_found() {
    let h = TestHarness::new();
    let base = h.serve().await;
    let owner = h.user(h.org("Acme"), Role::Editor);
    let outsider = h.user(h.org("Globex"), Role::Admin);
    let video = h.seed_video(&owner, b"frames");

    let foreign = subscribe(&base, &video.id.to_string(), &outsider.token).await;
    let unknown = subscribe(&base, &rf_core::VideoId::new().to_string(), &outsider.token).await;
    assert_eq!(foreign.status(), 404);
    assert_eq!(unknown.status(), 404);
    let foreign: Value = foreign.json().await.unwrap();
    let unknown: Value = unknown.json().await.unwrap();
    assert_eq!(foreign["code"], unknown["code"]);
    assert_eq!(h.ctx.hub.topic_count(), 0);

    let resp = reqwest::get(format!("{base}/api/videos/{}/events", video.id))
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn shutdown_ends_open_streams() {
    let h = TestHarness::new();
    let base = h.serve().await;
    let owner = h.user(h.org("Acme"), Role::Editor);
    let video = h.seed_video(&owner, b"frames");

    let mut reader = SseReader::new(subscribe(&base, &video.id.to_string(), &owner.token).await);
    h.ctx.shutdown.cancel();

    let end = tokio::time::timeout(Duration::from_secs(5), reader.next_frame())
        .await
        .expect("stream closed after shutdown");
    assert!(end.is_none());
}

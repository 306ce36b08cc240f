//! WebSocket Book-Feed Supervisor
//!
//! Owns one venue WS connection: connect, send the subscribe payload, decode
//! frames into `BookEvent`s, keep the link alive with pings, and reconnect
//! with exponential backoff when anything breaks. Every reconnect announces
//! itself so the engine can flush the quote cache — deltas resumed across a
//! gap would silently corrupt the ladders.
//!
//! Design rules carried from the book store this generalizes:
//! - never block the trading loop: events go out through the engine queue
//! - monotonic backoff doubling from base to cap (30 s)
//! - snapshot-before-delta is the venue's guarantee; we re-request it by
//!   resubscribing from scratch on every (re)connect

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::venue::{BookEvent, VenueId};

const RECONNECT_BASE_DELAY_MS: u64 = 250;
const RECONNECT_MAX_DELAY_MS: u64 = 30_000;
const PING_INTERVAL_MS: u64 = 5_000;
/// A healthy market channel never goes this long without traffic.
const READ_IDLE_TIMEOUT_MS: u64 = 30_000;

/// What a feed pushes into the engine queue.
#[derive(Debug)]
pub enum FeedEvent {
    Book { venue: VenueId, event: BookEvent },
    /// Connection (re)established and resubscribed; book state before this
    /// point is void.
    Resubscribed { venue: VenueId },
}

/// Static description of one venue's market channel.
pub struct FeedSpec {
    pub venue: VenueId,
    pub ws_url: String,
    /// JSON payload sent right after connecting.
    pub subscribe_payload: String,
    /// Frame decoder; returns no events for frames we do not care about.
    pub decode: Box<dyn Fn(&str) -> Vec<BookEvent> + Send + Sync>,
}

/// Spawn the supervisor task. It runs until `shutdown` flips or the engine
/// queue closes.
pub fn spawn_feed(
    spec: FeedSpec,
    tx: mpsc::Sender<FeedEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff_ms = RECONNECT_BASE_DELAY_MS;
        loop {
            if *shutdown.borrow() {
                return;
            }
            match run_connection(&spec, &tx, &mut shutdown).await {
                ConnectionEnd::Shutdown => return,
                ConnectionEnd::EngineGone => return,
                ConnectionEnd::Clean => {
                    backoff_ms = RECONNECT_BASE_DELAY_MS;
                }
                ConnectionEnd::Failed(reason) => {
                    warn!(
                        venue = %spec.venue,
                        %reason,
                        backoff_ms,
                        "book feed dropped; reconnecting"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return;
                            }
                        }
                    }
                    backoff_ms = (backoff_ms * 2).min(RECONNECT_MAX_DELAY_MS);
                }
            }
        }
    })
}

enum ConnectionEnd {
    Clean,
    Failed(String),
    Shutdown,
    EngineGone,
}

async fn run_connection(
    spec: &FeedSpec,
    tx: &mpsc::Sender<FeedEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> ConnectionEnd {
    let (mut ws, _) = match connect_async(spec.ws_url.as_str()).await {
        Ok(conn) => conn,
        Err(e) => return ConnectionEnd::Failed(format!("connect: {e}")),
    };
    if let Err(e) = ws.send(Message::Text(spec.subscribe_payload.clone())).await {
        return ConnectionEnd::Failed(format!("subscribe: {e}"));
    }
    info!(venue = %spec.venue, url = %spec.ws_url, "📡 book feed subscribed");
    if tx
        .send(FeedEvent::Resubscribed { venue: spec.venue })
        .await
        .is_err()
    {
        return ConnectionEnd::EngineGone;
    }

    let mut ping = interval(Duration::from_millis(PING_INTERVAL_MS));
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = ws.close(None).await;
                    return ConnectionEnd::Shutdown;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = ws.send(Message::Ping(Vec::new())).await {
                    return ConnectionEnd::Failed(format!("ping: {e}"));
                }
            }
            frame = timeout(Duration::from_millis(READ_IDLE_TIMEOUT_MS), ws.next()) => {
                let frame = match frame {
                    Err(_) => return ConnectionEnd::Failed("read idle timeout".into()),
                    Ok(None) => return ConnectionEnd::Failed("stream closed".into()),
                    Ok(Some(Err(e))) => return ConnectionEnd::Failed(format!("read: {e}")),
                    Ok(Some(Ok(frame))) => frame,
                };
                match frame {
                    Message::Text(text) => {
                        for event in (spec.decode)(&text) {
                            if tx
                                .send(FeedEvent::Book { venue: spec.venue, event })
                                .await
                                .is_err()
                            {
                                return ConnectionEnd::EngineGone;
                            }
                        }
                    }
                    Message::Ping(payload) => {
                        if ws.send(Message::Pong(payload)).await.is_err() {
                            return ConnectionEnd::Failed("pong failed".into());
                        }
                    }
                    Message::Close(_) => {
                        debug!(venue = %spec.venue, "server closed the book feed");
                        return ConnectionEnd::Clean;
                    }
                    _ => {}
                }
            }
        }
    }
}

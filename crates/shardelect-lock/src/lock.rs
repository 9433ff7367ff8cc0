//! Weighted distributed lock with delay
//!
//! Each participant advertises a weight under a shared KV prefix through a
//! session-acquired contender key; the heaviest live contender takes a
//! session-less lock key by CAS. A configurable delay dampens takeovers from
//! a live holder so brief disagreements between peers do not cause the
//! master role to oscillate.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use shardelect_consul::kv::PutOptions;
use shardelect_consul::watch::{KvWatcher, WatchConfig};
use shardelect_consul::{KvClient, KvEntry, Session, SessionBehavior, SessionClient};

use crate::config::LockConfig;
use crate::contender::{ContenderValue, LOCK_KEY, LockValue, PrefixSnapshot, parse_entries};
use crate::signal::Done;

/// Backoff between failed session/contender publish attempts.
const PUBLISH_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Fraction of the session TTL between renew calls.
const RENEW_TICK_FRACTION: f64 = 0.66;

/// A weighted lock over one KV prefix.
///
/// [`WLock::acquire`] blocks until this participant holds the lock or the
/// `done` signal closes. Once held, loss of the lock (preemption, session
/// expiry, watch failure) closes `done`, so the caller observes both
/// voluntary and involuntary release through the same primitive.
pub struct WLock {
    kv: KvClient,
    sessions: SessionClient,
    prefix: String,
    info: Value,
    session_ttl: Duration,
    weight: watch::Sender<f64>,
    delay: watch::Sender<Duration>,
}

impl WLock {
    pub fn new(kv: KvClient, config: LockConfig) -> Self {
        let sessions = SessionClient::from_http(kv.http().clone());
        let (weight, _) = watch::channel(config.weight);
        let (delay, _) = watch::channel(config.delay);
        Self {
            kv,
            sessions,
            prefix: config.prefix,
            info: config.info,
            session_ttl: config.session_ttl,
            weight,
            delay,
        }
    }

    /// Update the advertised weight.
    ///
    /// The renewer re-publishes the contender key under the current session;
    /// the resulting prefix change wakes every watcher, so peers reevaluate.
    pub fn set_weight(&self, weight: f64) {
        self.weight.send_replace(weight);
    }

    /// Update the takeover delay, truncating or extending an in-flight wait.
    pub fn set_delay(&self, delay: Duration) {
        self.delay.send_replace(delay);
    }

    /// Acquire the lock.
    ///
    /// Returns `true` once the lock is taken and being monitored, `false`
    /// when `done` closes first. Never errors: transient failures are logged
    /// and retried.
    pub async fn acquire(&self, done: Done) -> bool {
        let mut session: Option<Session> = None;

        loop {
            if done.is_closed() {
                return false;
            }

            // Phase 1: session + contender publish. A session surviving a
            // failed CAS is reused; its renewer keeps running.
            let current = match session.clone() {
                Some(existing) => existing,
                None => match self.publish_contender(&done).await {
                    Some(created) => {
                        self.spawn_renewer(created.clone(), done.clone());
                        session = Some(created.clone());
                        created
                    }
                    None => return false,
                },
            };

            // Phase 2: watch the prefix until this session may take the lock.
            let Some(ready) = self.wait_until_eligible(&current.id, &done).await else {
                return false;
            };

            // Phase 3: take the lock by CAS on its last observed index.
            if done.is_closed() {
                return false;
            }
            let value = LockValue {
                holder: current.id.clone(),
                info: self.info.clone(),
            };
            let body = match serde_json::to_vec(&value) {
                Ok(body) => body,
                Err(err) => {
                    warn!("failed to encode lock value: {}", err);
                    continue;
                }
            };
            match self
                .kv
                .put(
                    &self.lock_key(),
                    body,
                    PutOptions {
                        cas: Some(ready.lock_modify_index),
                        acquire: None,
                    },
                )
                .await
            {
                Ok(true) => {
                    info!("acquired lock for session {}", current.id);
                    self.spawn_hold_watch(current.id.clone(), done.clone());
                    return true;
                }
                Ok(false) => {
                    debug!(
                        "lock CAS at index {} lost for session {}, waiting again",
                        ready.lock_modify_index, current.id
                    );
                }
                Err(err) => {
                    warn!("lock CAS request failed: {}", err);
                }
            }
        }
    }

    fn contender_key(&self, session_id: &str) -> String {
        format!("{}/{}", self.prefix, session_id)
    }

    fn lock_key(&self) -> String {
        format!("{}/{}", self.prefix, LOCK_KEY)
    }

    /// Create a session and advertise this contender under it, retrying
    /// transient failures until `done` closes.
    async fn publish_contender(&self, done: &Done) -> Option<Session> {
        loop {
            if done.is_closed() {
                return None;
            }
            match self.try_publish().await {
                Ok(session) => {
                    info!("ready to lock with session {}", session.id);
                    return Some(session);
                }
                Err(err) => {
                    warn!(
                        "publishing contender failed, retrying in {:?}: {}",
                        PUBLISH_RETRY_BACKOFF, err
                    );
                    tokio::select! {
                        _ = done.closed() => return None,
                        _ = tokio::time::sleep(PUBLISH_RETRY_BACKOFF) => {}
                    }
                }
            }
        }
    }

    async fn try_publish(&self) -> shardelect_consul::Result<Session> {
        let session = self
            .sessions
            .create(self.session_ttl, SessionBehavior::Delete)
            .await?;
        info!("created session {}", session.id);

        let weight = *self.weight.borrow();
        let published = publish_weight(
            &self.kv,
            &self.contender_key(&session.id),
            &session.id,
            weight,
            &self.info,
        )
        .await;
        match published {
            Ok(true) => Ok(session),
            Ok(false) => {
                let _ = self.sessions.destroy(&session.id).await;
                Err(shardelect_consul::Error::Other(anyhow::anyhow!(
                    "contender key for session {} is acquired by another session",
                    session.id
                )))
            }
            Err(err) => {
                let _ = self.sessions.destroy(&session.id).await;
                Err(err)
            }
        }
    }

    /// Watch the prefix until this session is eligible and any takeover
    /// delay has elapsed. Returns `None` when `done` closes first.
    async fn wait_until_eligible(&self, session_id: &str, done: &Done) -> Option<PrefixSnapshot> {
        let (snapshot_tx, mut snapshot_rx) = mpsc::unbounded_channel::<Vec<KvEntry>>();
        let watcher = KvWatcher::new(
            self.kv.clone(),
            WatchConfig::prefix(&self.prefix).with_consistent(true),
            move |entries: &[KvEntry], _index| {
                let _ = snapshot_tx.send(entries.to_vec());
            },
        );
        let handle = watcher.spawn();

        let mut delay_rx = self.delay.subscribe();
        // Start of the delay wait, armed while eligible against a live
        // holder. Every snapshot restarts it; delay updates recompute the
        // deadline from the same start.
        let mut armed: Option<Instant> = None;
        let mut latest: Option<PrefixSnapshot> = None;

        let ready = loop {
            let deadline = armed.map(|start| start + *delay_rx.borrow());
            let sleep_until = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                _ = done.closed() => break None,
                _ = delay_rx.changed() => {}
                _ = tokio::time::sleep_until(sleep_until), if deadline.is_some() => {
                    debug!("takeover delay elapsed for session {}", session_id);
                    break latest.take();
                }
                received = snapshot_rx.recv() => {
                    let Some(entries) = received else {
                        // The watch loop only exits when told to; losing it
                        // without a close is unrecoverable for this attempt.
                        done.close();
                        break None;
                    };
                    let snapshot = parse_entries(&self.prefix, &entries);
                    if snapshot.eligible(session_id) {
                        if snapshot.holder.is_none() || delay_rx.borrow().is_zero() {
                            break Some(snapshot);
                        }
                        armed = Some(Instant::now());
                    } else {
                        armed = None;
                    }
                    latest = Some(snapshot);
                }
            }
        };

        handle.stop();
        ready
    }

    /// Keep the session alive and its advertised weight current.
    ///
    /// Runs until `done` closes; a failed renew or re-publish closes `done`
    /// itself (self-demotion). The session is destroyed on the way out,
    /// which deletes the contender key per `behavior=delete`.
    fn spawn_renewer(&self, session: Session, done: Done) {
        let kv = self.kv.clone();
        let sessions = self.sessions.clone();
        let key = self.contender_key(&session.id);
        let info = self.info.clone();
        let mut weight_rx = self.weight.subscribe();
        let tick = session.ttl.mul_f64(RENEW_TICK_FRACTION);

        tokio::spawn(async move {
            let mut published = *weight_rx.borrow();
            let mut next_renew = Instant::now() + tick;

            loop {
                tokio::select! {
                    _ = done.closed() => break,
                    _ = weight_rx.changed() => {}
                    _ = tokio::time::sleep_until(next_renew) => {
                        match sessions.renew(&session.id).await {
                            Ok(true) => debug!("renewed session {}", session.id),
                            Ok(false) => {
                                warn!("session {} is gone, demoting", session.id);
                                done.close();
                                break;
                            }
                            Err(err) => {
                                warn!("failed to renew session {}: {}", session.id, err);
                                done.close();
                                break;
                            }
                        }
                        next_renew = Instant::now() + tick;
                    }
                }

                let weight = *weight_rx.borrow();
                if weight != published {
                    match publish_weight(&kv, &key, &session.id, weight, &info).await {
                        Ok(true) => {
                            debug!("re-published weight {} for session {}", weight, session.id);
                            published = weight;
                        }
                        Ok(false) => {
                            warn!("contender key for session {} no longer ours, demoting", session.id);
                            done.close();
                            break;
                        }
                        Err(err) => {
                            warn!("failed to re-publish contender for session {}: {}", session.id, err);
                            done.close();
                            break;
                        }
                    }
                }
            }

            if sessions.destroy(&session.id).await.unwrap_or(false) {
                info!("released and deleted session {}", session.id);
            } else {
                debug!("session {} was already gone at teardown", session.id);
            }
        });
    }

    /// Monitor a held lock: any snapshot without this session as holder, or
    /// a watch failure, closes `done`.
    fn spawn_hold_watch(&self, session_id: String, done: Done) {
        let prefix = self.prefix.clone();
        let change_done = done.clone();
        let error_done = done.clone();
        let watcher = KvWatcher::new(
            self.kv.clone(),
            WatchConfig::prefix(&self.prefix).with_consistent(true),
            move |entries: &[KvEntry], _index| {
                let snapshot = parse_entries(&prefix, &entries);
                if snapshot.holder.as_deref() != Some(session_id.as_str()) {
                    info!("lost lock: holder changed");
                    change_done.close();
                }
            },
        )
        .on_error(move |err| {
            warn!("lock watch failed: {}", err);
            error_done.close();
        });
        let handle = watcher.spawn();

        tokio::spawn(async move {
            done.closed().await;
            handle.stop();
        });
    }
}

async fn publish_weight(
    kv: &KvClient,
    key: &str,
    session_id: &str,
    weight: f64,
    info: &Value,
) -> shardelect_consul::Result<bool> {
    let value = ContenderValue {
        weight,
        info: info.clone(),
    };
    let body = serde_json::to_vec(&value)?;
    kv.put(
        key,
        body,
        PutOptions {
            cas: None,
            acquire: Some(session_id),
        },
    )
    .await
}

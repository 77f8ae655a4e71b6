//! Per-user agent sessions with idle eviction.
//!
//! One `RagPipeline` (and its conversation history) per user id. Expired
//! sessions are swept on each incoming request rather than by a timer task,
//! so an idle service holds no background work for session management.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::RagPipeline;

struct Session {
    pipeline: RagPipeline,
    last_access: Instant,
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Route one query to the user's session, creating it on first use.
    ///
    /// The registry lock is held only for lookup/sweep; the per-session lock
    /// serializes turns of a single user without blocking other users.
    pub async fn chat(
        &self,
        user_id: &str,
        query: &str,
        make_pipeline: impl FnOnce() -> RagPipeline,
    ) -> String {
        let session = {
            let mut sessions = self.sessions.lock().await;
            sweep(&mut sessions, self.idle_timeout);
            sessions
                .entry(user_id.to_string())
                .or_insert_with(|| {
                    tracing::debug!("Creating agent session for user '{}'", user_id);
                    Arc::new(Mutex::new(Session {
                        pipeline: make_pipeline(),
                        last_access: Instant::now(),
                    }))
                })
                .clone()
        };

        let mut guard = session.lock().await;
        guard.last_access = Instant::now();
        guard.pipeline.invoke(query).await.into_text()
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

fn sweep(sessions: &mut HashMap<String, Arc<Mutex<Session>>>, idle_timeout: Duration) {
    let before = sessions.len();
    sessions.retain(|_, session| match session.try_lock() {
        Ok(guard) => guard.last_access.elapsed() <= idle_timeout,
        // A session that is mid-invoke is in use; keep it.
        Err(_) => true,
    });
    let evicted = before - sessions.len();
    if evicted > 0 {
        tracing::info!("Evicted {} idle agent session(s)", evicted);
    }
}

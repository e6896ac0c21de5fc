use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use super::orchestrator::{Pipeline, Session};
use crate::config::SessionConfig;

#[derive(Debug, thiserror::Error)]
#[error("session limit of {0} reached")]
pub struct SessionLimitReached(pub usize);

struct Entry {
    session: Arc<Mutex<Session>>,
    last_active: Instant,
}

/// In-memory registry of live sessions. Each session sits behind its own
/// mutex, so one session's turn never blocks another's.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Entry>>,
    pipeline: Arc<Pipeline>,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(pipeline: Arc<Pipeline>, config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            pipeline,
            config,
        }
    }

    pub async fn create(&self) -> Result<Uuid, SessionLimitReached> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.config.max_sessions {
            return Err(SessionLimitReached(self.config.max_sessions));
        }
        let id = Uuid::new_v4();
        let session = Session::new(id, self.pipeline.clone(), &self.config);
        sessions.insert(
            id,
            Entry {
                session: Arc::new(Mutex::new(session)),
                last_active: Instant::now(),
            },
        );
        info!("Created session {} ({} live)", id, sessions.len());
        Ok(id)
    }

    /// Looks a session up and marks it active.
    pub async fn get(&self, id: Uuid) -> Option<Arc<Mutex<Session>>> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id)?;
        entry.last_active = Instant::now();
        Some(entry.session.clone())
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            info!("Ended session {}", id);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drops sessions idle for longer than the TTL. Sessions with a turn in
    /// progress are skipped.
    pub async fn purge_idle(&self) -> usize {
        let ttl = self.config.idle_ttl;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| {
            entry.last_active.elapsed() < ttl || entry.session.try_lock().is_err()
        });
        let purged = before - sessions.len();
        if purged > 0 {
            info!("Purged {} idle session(s)", purged);
        } else {
            debug!("No idle sessions to purge");
        }
        purged
    }

    /// Runs `purge_idle` every `every` until the task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.purge_idle().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, PromptConfig, SanitizerConfig};
    use crate::extraction::fake::CountingExtractor;
    use crate::feedback::ResponseValidator;
    use crate::llm_client::fake::ScriptedBackend;
    use crate::llm_client::ModelClient;
    use crate::prompt::PromptAssembler;
    use crate::sanitizer::Sanitizer;

    fn store(config: SessionConfig) -> Arc<SessionStore> {
        let sanitizer = Arc::new(Sanitizer::new(&SanitizerConfig::default(), &[]).unwrap());
        let pipeline = Arc::new(Pipeline {
            extractor: Arc::new(CountingExtractor::new("resume")),
            sanitizer: sanitizer.clone(),
            assembler: PromptAssembler::new(&PromptConfig::default()),
            client: ModelClient::new(Arc::new(ScriptedBackend::hanging()), &ModelConfig::default()),
            validator: ResponseValidator::new(sanitizer),
        });
        Arc::new(SessionStore::new(pipeline, config))
    }

    #[tokio::test]
    async fn test_create_get_remove() {
        let store = store(SessionConfig::default());
        let id = store.create().await.unwrap();
        let session = store.get(id).await.unwrap();
        assert_eq!(session.lock().await.id(), id);
        assert!(store.remove(id).await);
        assert!(store.get(id).await.is_none());
        assert!(!store.remove(id).await);
    }

    #[tokio::test]
    async fn test_enforces_session_limit() {
        let store = store(SessionConfig {
            max_sessions: 2,
            ..SessionConfig::default()
        });
        store.create().await.unwrap();
        store.create().await.unwrap();
        assert!(store.create().await.is_err());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purges_only_idle_unlocked_sessions() {
        let store = store(SessionConfig {
            idle_ttl: Duration::from_secs(60),
            ..SessionConfig::default()
        });
        let idle = store.create().await.unwrap();
        let busy = store.create().await.unwrap();

        let busy_session = store.get(busy).await.unwrap();
        let _guard = busy_session.lock().await;
        tokio::time::advance(Duration::from_secs(61)).await;
        let fresh = store.create().await.unwrap();

        assert_eq!(store.purge_idle().await, 1);
        assert!(store.get(idle).await.is_none());
        assert!(store.get(busy).await.is_some());
        assert!(store.get(fresh).await.is_some());
    }
}

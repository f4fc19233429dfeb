//! Table of running sessions addressed by opaque ids

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{ConnectionProfile, EngineConfig};
use crate::connection::Connector;
use crate::session::{EngineHandle, EngineState, Event, Job, SessionEngine};

/// Opaque handle the presentation layer uses to address a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u32);

impl SessionId {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Session {0} is closed")]
    Closed(SessionId),
}

/// Owns every session engine of the process
pub struct SessionRegistry {
    connector: Arc<dyn Connector>,
    config: EngineConfig,
    sessions: DashMap<SessionId, EngineHandle>,
    next_id: AtomicU32,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn Connector>, config: EngineConfig) -> Self {
        Self {
            connector,
            config,
            sessions: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Start a session worker without connecting it
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self) -> (SessionId, mpsc::UnboundedReceiver<Event>) {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (handle, events) = SessionEngine::spawn(id, self.connector.clone(), self.config.clone());
        self.sessions.insert(id, handle);
        info!(session_id = %id, "Session registered");
        (id, events)
    }

    /// Start a session and queue a connect job for `profile`
    pub fn open(
        &self,
        profile: &ConnectionProfile,
    ) -> Result<(SessionId, mpsc::UnboundedReceiver<Event>), RegistryError> {
        let (id, events) = self.spawn();
        self.submit(id, Job::connect(profile))?;
        Ok((id, events))
    }

    pub fn submit(&self, id: SessionId, job: Job) -> Result<(), RegistryError> {
        let handle = self
            .sessions
            .get(&id)
            .ok_or(RegistryError::UnknownSession(id))?;
        handle.submit(job).map_err(|_| {
            warn!(session_id = %id, "Job submitted to a closed session");
            RegistryError::Closed(id)
        })
    }

    /// Submit a job by its string tag; unknown tags are ignored
    pub fn submit_tag(
        &self,
        id: SessionId,
        tag: &str,
        primary: &str,
        secondary: Option<String>,
    ) -> Result<(), RegistryError> {
        let handle = self
            .sessions
            .get(&id)
            .ok_or(RegistryError::UnknownSession(id))?;
        handle
            .submit_tag(tag, primary, secondary, None)
            .map_err(|_| RegistryError::Closed(id))
    }

    /// Disconnect a session and wait for its worker to finish
    pub async fn close(&self, id: SessionId) -> Result<(), RegistryError> {
        let (_, handle) = self
            .sessions
            .remove(&id)
            .ok_or(RegistryError::UnknownSession(id))?;
        // Already closed sessions only need their worker joined
        let _ = handle.submit(Job::disconnect());
        handle.join().await;
        info!(session_id = %id, "Session closed");
        Ok(())
    }

    /// Current state of a session's worker
    pub fn state(&self, id: SessionId) -> Result<EngineState, RegistryError> {
        self.sessions
            .get(&id)
            .map(|handle| handle.state())
            .ok_or(RegistryError::UnknownSession(id))
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use log::{debug, info, trace};
use moka::future::Cache;
use schemars::JsonSchema;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, TryLockError};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{CommandLog, ConnectionId, SessionState, ShellSession, ShellSettings, now_ms};
use crate::device::{Device, DeviceSnapshot, Protocol};
use crate::error::SessionError;
use crate::profile;
use crate::transport::{ConnectTarget, Connector};

/// Registry-wide lifecycle settings.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Sessions without a command for this long are reaped.
    pub idle_timeout: Duration,
    pub reap_interval: Duration,
    pub shell: Arc<ShellSettings>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(600),
            reap_interval: Duration::from_secs(30),
            shell: Arc::new(ShellSettings::default()),
        }
    }
}

/// A registered session and the lock that serializes its commands.
pub struct SessionHandle {
    id: ConnectionId,
    snapshot: DeviceSnapshot,
    created_at_ms: u64,
    epoch: Instant,
    last_activity_ms: AtomicU64,
    closed: AtomicBool,
    history: CommandLog,
    session: Mutex<ShellSession>,
}

impl SessionHandle {
    fn new(session: ShellSession) -> Self {
        Self {
            id: session.id(),
            snapshot: session.snapshot().clone(),
            created_at_ms: now_ms(),
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            history: session.history().clone(),
            session: Mutex::new(session),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn snapshot(&self) -> &DeviceSnapshot {
        &self.snapshot
    }

    pub fn history(&self) -> &CommandLog {
        &self.history
    }

    /// Waits for exclusive use of the session.
    pub async fn lock(&self) -> MutexGuard<'_, ShellSession> {
        self.session.lock().await
    }

    pub fn try_lock(&self) -> Result<MutexGuard<'_, ShellSession>, TryLockError> {
        self.session.try_lock()
    }

    /// Records activity now.
    pub fn touch(&self) {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        self.last_activity_ms.store(elapsed, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(last)
    }

    /// Whether the session was removed from the registry.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Summary without waiting for a running command.
    pub fn summary(&self) -> SessionSummary {
        let (busy, state, prompt, degraded) = match self.session.try_lock() {
            Ok(session) => (
                false,
                Some(session.state()),
                Some(session.prompt().to_string()).filter(|p| !p.is_empty()),
                session.is_degraded(),
            ),
            Err(_) => (true, None, None, false),
        };
        SessionSummary {
            connection_id: self.id,
            device: self.snapshot.clone(),
            created_at_ms: self.created_at_ms,
            idle_ms: self.idle_for().as_millis() as u64,
            busy,
            state,
            prompt,
            degraded,
            commands: self.history.len(),
        }
    }
}

/// One row of the live-session listing.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SessionSummary {
    pub connection_id: ConnectionId,
    pub device: DeviceSnapshot,
    pub created_at_ms: u64,
    pub idle_ms: u64,
    /// A command is running right now.
    pub busy: bool,
    /// Unknown while busy.
    pub state: Option<SessionState>,
    pub prompt: Option<String>,
    pub degraded: bool,
    pub commands: usize,
}

/// The single owner of all live sessions.
pub struct SessionRegistry {
    sessions: Cache<ConnectionId, Arc<SessionHandle>>,
    connector: Arc<dyn Connector>,
    settings: RegistrySettings,
    reaper: StdMutex<Option<JoinHandle<()>>>,
}

impl SessionRegistry {
    /// Sessions are never evicted by the cache itself; reaping decides, because
    /// only the reaper can see whether a command is in flight.
    pub fn new(connector: Arc<dyn Connector>, settings: RegistrySettings) -> Self {
        Self {
            sessions: Cache::builder().build(),
            connector,
            settings,
            reaper: StdMutex::new(None),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Opens a channel, logs in and registers the session.
    ///
    /// On failure the channel is closed and nothing is registered.
    pub async fn create(&self, device: &Device, protocol: Protocol) -> Result<ConnectionId, SessionError> {
        let profile = match device.platform.as_deref() {
            Some(name) => profile::by_name(name)?,
            None => profile::for_device_type(device.device_type)?,
        };
        let target = ConnectTarget::for_device(device, protocol);
        let id = ConnectionId::next();
        debug!("{} opening {} to {}", id, protocol, target.label());

        let channel = self.connector.open(&target).await?;
        let mut session = ShellSession::new(
            id,
            device.snapshot(protocol),
            channel,
            profile,
            self.settings.shell.clone(),
        );
        if let Err(err) = session
            .login(&target.credentials, self.settings.shell.login_timeout)
            .await
        {
            session.close().await;
            debug!("{} login failed: {}", id, err);
            return Err(err);
        }

        let handle = Arc::new(SessionHandle::new(session));
        handle.touch();
        self.sessions.insert(id, handle).await;
        debug!("{} registered for {}", id, target.label());
        Ok(id)
    }

    /// Borrows a live session.
    pub async fn get(&self, id: ConnectionId) -> Result<Arc<SessionHandle>, SessionError> {
        match self.sessions.get(&id).await {
            Some(handle) if !handle.is_closed() => Ok(handle),
            Some(_) => {
                self.sessions.invalidate(&id).await;
                Err(SessionError::NotFound(id))
            }
            None => Err(SessionError::NotFound(id)),
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregisters and closes a session. Returns whether it was registered.
    ///
    /// Waits for a running command on that session to finish first.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        let Some(handle) = self.sessions.remove(&id).await else {
            trace!("{} already removed", id);
            return false;
        };
        handle.mark_closed();
        let mut session = handle.lock().await;
        session.close().await;
        debug!("{} removed", id);
        true
    }

    /// Unregisters a session whose caller already holds its lock.
    pub async fn discard(&self, handle: &SessionHandle) {
        handle.mark_closed();
        self.sessions.invalidate(&handle.id()).await;
        debug!("{} discarded", handle.id());
    }

    /// Closes sessions idle beyond the threshold and sessions whose channel died.
    ///
    /// Sessions with a command in flight are skipped.
    pub async fn reap_idle(&self) -> Vec<ConnectionId> {
        let candidates: Vec<(ConnectionId, Arc<SessionHandle>)> = self
            .sessions
            .iter()
            .map(|(id, handle)| (*id, handle))
            .collect();

        let mut reaped = Vec::new();
        for (id, handle) in candidates {
            let Ok(mut session) = handle.try_lock() else {
                trace!("{} busy, not reaping", id);
                continue;
            };
            let idle = handle.idle_for();
            let dead = session.state() == SessionState::Closed || session.is_channel_closed();
            if !dead && idle < self.settings.idle_timeout {
                continue;
            }
            handle.mark_closed();
            self.sessions.invalidate(&id).await;
            session.close().await;
            if dead {
                info!("{} reaped: channel closed ({})", id, handle.snapshot().label());
            } else {
                info!(
                    "{} reaped after {} s idle ({})",
                    id,
                    idle.as_secs(),
                    handle.snapshot().label()
                );
            }
            reaped.push(id);
        }
        reaped
    }

    /// Runs [`SessionRegistry::reap_idle`] every `reap_interval` until the registry is dropped.
    pub fn start_reaper(self: &Arc<Self>) {
        let registry = Arc::downgrade(self);
        let period = self.settings.reap_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let reaped = registry.reap_idle().await;
                if !reaped.is_empty() {
                    debug!("reaper closed {} session(s)", reaped.len());
                }
            }
        });
        let previous = self
            .reaper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn stop_reaper(&self) {
        if let Some(task) = self.reaper.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }

    /// Live sessions ordered by id.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<_> = self
            .sessions
            .iter()
            .filter(|(_, handle)| !handle.is_closed())
            .map(|(_, handle)| handle.summary())
            .collect();
        summaries.sort_by_key(|s| s.connection_id);
        summaries
    }

    /// Stops reaping and closes every session.
    pub async fn shutdown(&self) {
        self.stop_reaper();
        let ids: Vec<ConnectionId> = self.sessions.iter().map(|(id, _)| *id).collect();
        for id in &ids {
            self.remove(*id).await;
        }
        debug!("registry shut down, closed {} session(s)", ids.len());
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.stop_reaper();
    }
}

//! This modules provides the entry points of the sync engine
//!
//! A [`SyncService`] receives sync requests from users, rate-limits them, and dispatches them to the [`RemoteProvider`] registered for the requested provider.
//! Every request builds its own [`SyncContext`](crate::context::SyncContext), that is released once the request is over.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::client::{Client, DiscoveryError};
use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::credentials::CredentialSupplier;
use crate::event::{DateWindow, Event, EventSource};
use crate::fetch::{fetch_events, FetchReport};
use crate::throttle::SyncThrottle;
use crate::traits::EventStore;
use crate::writer::{delete_event, upsert_event, DeleteOutcome, UpsertResult};

pub mod sync_progress;
use sync_progress::{FeedbackSender, SyncEvent, SyncProgress};
pub mod registry;
use registry::ProviderRegistry;


/// Why a sync request could not be served
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no calendar account is configured for {user}")]
    MissingCredentials { user: String },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("a sync was started recently, retry in {retry_after_secs} seconds")]
    Throttled { retry_after_secs: u64 },
    #[error("unable to connect to the calendar server: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("local storage failed: {0}")]
    Store(String),
    #[error("no provider is registered for {0}")]
    UnknownProvider(EventSource),
}

/// The summary of a sync request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub success: bool,
    /// How many remote events have been seen
    pub scanned: usize,
    /// How many new events have been stored locally
    pub saved: usize,
    /// What went wrong (or partially wrong)
    pub diagnostic: Option<String>,
}

impl SyncReport {
    fn from_fetch(report: FetchReport) -> Self {
        let diagnostic = if report.failed_calendars.is_empty() {
            None
        } else {
            Some(format!("some calendars could not be fetched: {}", report.failed_calendars.join(", ")))
        };
        Self { success: true, scanned: report.scanned, saved: report.saved, diagnostic }
    }

    fn from_error(err: &SyncError) -> Self {
        Self { success: false, diagnostic: Some(err.to_string()), ..Self::default() }
    }
}


/// A remote calendar provider
#[async_trait]
pub trait RemoteProvider: Send + Sync {
    /// The provider tag events fetched by this provider carry
    fn source(&self) -> EventSource;

    /// Store the remote events of `user` that are not known locally yet
    async fn fetch(&self, user: &str, window: &DateWindow, store: &dyn EventStore, progress: &mut SyncProgress) -> Result<FetchReport, SyncError>;
    /// Create or update an event on the server
    async fn push(&self, user: &str, event: &mut Event) -> Result<UpsertResult, SyncError>;
    /// Delete an event from the server
    async fn remove(&self, user: &str, event: &Event) -> Result<DeleteOutcome, SyncError>;
}


/// A provider that talks to a CalDAV server
pub struct CalDavProvider {
    config: SyncConfig,
    credentials: Arc<dyn CredentialSupplier>,
}

impl CalDavProvider {
    pub fn new(config: SyncConfig, credentials: Arc<dyn CredentialSupplier>) -> Self {
        Self { config, credentials }
    }

    /// Run the discovery for this user
    async fn context_for(&self, user: &str) -> Result<SyncContext, SyncError> {
        let credentials = self.credentials.credentials_for(user).await
            .ok_or_else(|| SyncError::MissingCredentials { user: user.to_string() })?;
        let client = Client::from_config(&self.config, credentials)
            .map_err(|err| SyncError::InvalidConfiguration(err.to_string()))?;
        let context = client.build_context().await?;
        Ok(context)
    }
}

#[async_trait]
impl RemoteProvider for CalDavProvider {
    fn source(&self) -> EventSource {
        EventSource::CalDav
    }

    async fn fetch(&self, user: &str, window: &DateWindow, store: &dyn EventStore, progress: &mut SyncProgress) -> Result<FetchReport, SyncError> {
        let context = self.context_for(user).await?;
        progress.debug(&format!("Found {} calendars for {} on {}", context.calendars().len(), user, context.host().unwrap_or("?")));

        let report = fetch_events(&context, store, user, window, progress).await
            .map_err(|err| SyncError::Store(err.to_string()))?;
        drop(context);

        self.credentials.record_sync(user, Utc::now()).await;
        Ok(report)
    }

    async fn push(&self, user: &str, event: &mut Event) -> Result<UpsertResult, SyncError> {
        let context = self.context_for(user).await?;
        Ok(upsert_event(&context, event).await)
    }

    async fn remove(&self, user: &str, event: &Event) -> Result<DeleteOutcome, SyncError> {
        let context = self.context_for(user).await?;
        Ok(delete_event(&context, event).await)
    }
}


/// The entry point of user-initiated syncs
pub struct SyncService {
    registry: ProviderRegistry,
    store: Arc<dyn EventStore>,
    throttle: Arc<dyn SyncThrottle>,
    config: SyncConfig,
    /// Syncs of a given user are serialized, so that their counts stay consistent with the store
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SyncService {
    pub fn new(registry: ProviderRegistry, store: Arc<dyn EventStore>, throttle: Arc<dyn SyncThrottle>, config: SyncConfig) -> Self {
        Self {
            registry,
            store,
            throttle,
            config,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> { &self.store }

    /// Fetch the remote events of a user, in the default window around now
    pub async fn sync(&self, user: &str, source: EventSource) -> SyncReport {
        let window = self.config.default_window(Utc::now());
        let mut progress = SyncProgress::new();
        self.sync_window(user, source, &window, &mut progress).await
    }

    /// Same as [`Self::sync`], but also sends feedback about the progress
    pub async fn sync_with_feedback(&self, user: &str, source: EventSource, feedback_sender: FeedbackSender) -> SyncReport {
        let window = self.config.default_window(Utc::now());
        let mut progress = SyncProgress::new_with_feedback_channel(feedback_sender);
        self.sync_window(user, source, &window, &mut progress).await
    }

    /// Fetch the remote events of a user that overlap `window`.
    ///
    /// This is refused if the same user started a sync less than the configured cooldown ago.
    pub async fn sync_window(&self, user: &str, source: EventSource, window: &DateWindow, progress: &mut SyncProgress) -> SyncReport {
        if let Err(left) = self.throttle.try_acquire(user, self.config.cooldown()) {
            let err = SyncError::Throttled { retry_after_secs: left.as_secs().max(1) };
            progress.info(&format!("Sync refused for {}: {}", user, err));
            return SyncReport::from_error(&err);
        }

        progress.feedback(SyncEvent::Started { user: user.to_string() });
        let result = {
            let lock = self.user_lock(user);
            let _guard = lock.lock().await;
            match self.registry.get(source) {
                Err(err) => Err(err),
                Ok(provider) => provider.fetch(user, window, self.store.as_ref(), progress).await,
            }
        };
        self.forget_user_lock(user);

        let report = match result {
            Err(err) => {
                progress.error(&format!("Sync of {} failed: {}", user, err));
                SyncReport::from_error(&err)
            },
            Ok(fetched) => SyncReport::from_fetch(fetched),
        };
        progress.feedback(SyncEvent::Finished { success: report.success, scanned: report.scanned, saved: report.saved });
        report
    }

    /// Push a local event to the server, and store the UID it is linked to.
    ///
    /// This waits for any running sync of the same user, so that a fetch never sees an event linked halfway through.
    pub async fn push(&self, user: &str, source: EventSource, event: &mut Event) -> UpsertResult {
        let result = {
            let lock = self.user_lock(user);
            let _guard = lock.lock().await;
            self.push_locked(user, source, event).await
        };
        self.forget_user_lock(user);
        result
    }

    async fn push_locked(&self, user: &str, source: EventSource, event: &mut Event) -> UpsertResult {
        let result = match self.registry.get(source) {
            Err(err) => Err(err),
            Ok(provider) => provider.push(user, event).await,
        };
        let mut result = match result {
            Err(err) => return UpsertResult {
                success: false,
                uid: event.uid().map(|uid| uid.to_string()),
                diagnostic: Some(err.to_string()),
                ..UpsertResult::default()
            },
            Ok(r) => r,
        };

        if result.success {
            if let Err(err) = self.save_pushed(event).await {
                log::warn!("Event {} was pushed, but could not be updated locally: {}", event.id(), err);
                result.diagnostic = Some(format!("pushed, but the local copy could not be updated: {}", err));
            }
        }
        result
    }

    /// Delete an event from the server
    pub async fn remove(&self, user: &str, source: EventSource, event: &Event) -> DeleteOutcome {
        let result = {
            let lock = self.user_lock(user);
            let _guard = lock.lock().await;
            match self.registry.get(source) {
                Err(err) => Err(err),
                Ok(provider) => provider.remove(user, event).await,
            }
        };
        self.forget_user_lock(user);

        match result {
            Err(err) => DeleteOutcome::Failed { status: None, diagnostic: err.to_string() },
            Ok(outcome) => outcome,
        }
    }

    async fn save_pushed(&self, event: &Event) -> Result<(), SyncError> {
        let known = self.store.find_by_id(event.id()).await.map_err(|err| SyncError::Store(err.to_string()))?;
        if known.is_none() {
            log::debug!("Event {} is not stored locally, nothing to update", event.id());
            return Ok(());
        }
        self.store.update(event.clone()).await.map_err(|err| SyncError::Store(err.to_string()))
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        match self.user_locks.lock() {
            Ok(l) => l,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn user_lock(&self, user: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks().entry(user.to_string()).or_default())
    }

    /// Drop the lock of a user once nobody holds or waits for it
    fn forget_user_lock(&self, user: &str) {
        let mut locks = self.locks();
        let unused = locks.get(user).map(|lock| Arc::strong_count(lock) == 1).unwrap_or(false);
        if unused {
            locks.remove(user);
        }
    }
}

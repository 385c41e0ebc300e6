//! Traits used by the sync engine to reach its collaborators

use std::error::Error;

use async_trait::async_trait;

use crate::event::{Event, EventId};

/// The error type of local store operations
pub type StoreError = Box<dyn Error + Send + Sync>;

/// The local store events are persisted into
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Every event owned by this user
    async fn find_by_user(&self, user: &str) -> Result<Vec<Event>, StoreError>;
    /// The event of this user that is linked to this remote UID, if any
    async fn find_by_uid(&self, user: &str, uid: &str) -> Result<Option<Event>, StoreError>;
    async fn find_by_id(&self, id: &EventId) -> Result<Option<Event>, StoreError>;

    /// Add a new event
    async fn insert(&self, event: Event) -> Result<(), StoreError>;
    /// Add several events at once. Either they are all stored, or none of them is
    async fn insert_all(&self, events: Vec<Event>) -> Result<(), StoreError>;
    /// Replace an existing event (with the same local id)
    async fn update(&self, event: Event) -> Result<(), StoreError>;
    /// Remove an event from the store
    async fn delete(&self, id: &EventId) -> Result<(), StoreError>;
}

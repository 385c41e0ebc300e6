//! This module provides a local store for events, backed by a JSON file

use std::collections::{HashMap, HashSet};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "local_store_mocks"))]
use std::sync::Arc;
#[cfg(any(test, feature = "local_store_mocks"))]
use crate::mock_behaviour::MockBehaviour;

use crate::event::{Event, EventId};
use crate::traits::{EventStore, StoreError};


/// An event store that keeps its events in memory, and saves them to a local file after every change
#[derive(Debug)]
pub struct Cache {
    backing_file: Option<PathBuf>,
    data: Mutex<CachedData>,

    #[cfg(any(test, feature = "local_store_mocks"))]
    mock_behaviour: Option<Arc<Mutex<MockBehaviour>>>,
}

#[derive(Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
struct CachedData {
    events: HashMap<EventId, Event>,
}

impl CachedData {
    fn uid_is_taken(&self, owner: &str, uid: &str) -> bool {
        self.events.values().any(|ev| ev.owner() == owner && ev.uid() == Some(uid))
    }
}

impl Cache {
    /// Initialize a cache from the content of a valid backing file if it exists.
    /// Returns an error otherwise
    pub fn from_file(path: &Path) -> Result<Self, StoreError> {
        let data = match std::fs::File::open(path) {
            Err(err) => {
                return Err(format!("Unable to open file {:?}: {}", path, err).into());
            },
            Ok(file) => serde_json::from_reader(file)?,
        };

        Ok(Self::with_data(Some(PathBuf::from(path)), data))
    }

    /// Initialize an empty cache, that will be saved to `path`
    pub fn new(path: &Path) -> Self {
        Self::with_data(Some(PathBuf::from(path)), CachedData::default())
    }

    /// Initialize an empty cache, that is never saved
    pub fn in_memory() -> Self {
        Self::with_data(None, CachedData::default())
    }

    fn with_data(backing_file: Option<PathBuf>, data: CachedData) -> Self {
        Self {
            backing_file,
            data: Mutex::new(data),
            #[cfg(any(test, feature = "local_store_mocks"))]
            mock_behaviour: None,
        }
    }

    #[cfg(any(test, feature = "local_store_mocks"))]
    pub fn set_mock_behaviour(&mut self, mock_behaviour: Option<Arc<Mutex<MockBehaviour>>>) {
        self.mock_behaviour = mock_behaviour;
    }

    /// The total count of stored events, whatever their owner
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, CachedData> {
        match self.data.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Apply a change to `data`. With a backing file, the change is kept only if it could be saved
    fn commit<F: FnOnce(&mut CachedData)>(&self, data: &mut CachedData, change: F) -> Result<(), StoreError> {
        if self.backing_file.is_none() {
            change(data);
            return Ok(());
        }

        let mut updated = data.clone();
        change(&mut updated);
        self.save_to_file(&updated)?;
        *data = updated;
        Ok(())
    }

    /// Store some content to the backing file (if any).
    /// It is written to a sibling temporary file first, so that the previous content stays intact until the new one is complete
    fn save_to_file(&self, data: &CachedData) -> Result<(), StoreError> {
        let path = match &self.backing_file {
            None => return Ok(()),
            Some(path) => path,
        };
        let mut tmp_path = path.as_os_str().to_owned();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let result = write_json(&tmp_path, data)
            .and_then(|_| std::fs::rename(&tmp_path, path).map_err(StoreError::from));
        if let Err(err) = &result {
            log::warn!("Unable to save file {:?}: {}", path, err);
            let _ = std::fs::remove_file(&tmp_path);
        }
        result
    }

    #[cfg(any(test, feature = "local_store_mocks"))]
    fn mock_check(&self, check: fn(&mut MockBehaviour) -> Result<(), StoreError>) -> Result<(), StoreError> {
        match &self.mock_behaviour {
            None => Ok(()),
            Some(behaviour) => {
                let mut behaviour = match behaviour.lock() {
                    Ok(b) => b,
                    Err(poisoned) => poisoned.into_inner(),
                };
                check(&mut behaviour)
            },
        }
    }

    /// Check an event can be added to `data`
    fn check_insertable(data: &CachedData, event: &Event) -> Result<(), StoreError> {
        if data.events.contains_key(event.id()) {
            return Err(format!("Event {} is already stored", event.id()).into());
        }
        if let Some(uid) = event.uid() {
            if data.uid_is_taken(event.owner(), uid) {
                return Err(format!("An event with UID {} is already stored for {}", uid, event.owner()).into());
            }
        }
        Ok(())
    }
}

fn write_json(path: &Path, data: &CachedData) -> Result<(), StoreError> {
    let file = std::fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, data)?;
    writer.flush()?;
    Ok(())
}

#[async_trait]
impl EventStore for Cache {
    async fn find_by_user(&self, user: &str) -> Result<Vec<Event>, StoreError> {
        #[cfg(any(test, feature = "local_store_mocks"))]
        self.mock_check(MockBehaviour::can_find)?;

        Ok(self.lock().events.values()
            .filter(|ev| ev.owner() == user)
            .cloned()
            .collect())
    }

    async fn find_by_uid(&self, user: &str, uid: &str) -> Result<Option<Event>, StoreError> {
        #[cfg(any(test, feature = "local_store_mocks"))]
        self.mock_check(MockBehaviour::can_find)?;

        Ok(self.lock().events.values()
            .find(|ev| ev.owner() == user && ev.uid() == Some(uid))
            .cloned())
    }

    async fn find_by_id(&self, id: &EventId) -> Result<Option<Event>, StoreError> {
        #[cfg(any(test, feature = "local_store_mocks"))]
        self.mock_check(MockBehaviour::can_find)?;

        Ok(self.lock().events.get(id).cloned())
    }

    async fn insert(&self, event: Event) -> Result<(), StoreError> {
        #[cfg(any(test, feature = "local_store_mocks"))]
        self.mock_check(MockBehaviour::can_insert)?;

        let mut data = self.lock();
        Self::check_insertable(&data, &event)?;
        self.commit(&mut data, |data| {
            data.events.insert(event.id().clone(), event);
        })
    }

    async fn insert_all(&self, events: Vec<Event>) -> Result<(), StoreError> {
        #[cfg(any(test, feature = "local_store_mocks"))]
        self.mock_check(MockBehaviour::can_insert_all)?;

        let mut data = self.lock();

        // Everything is checked before anything is inserted
        let mut batch_ids = HashSet::new();
        let mut batch_uids = HashSet::new();
        for event in &events {
            Self::check_insertable(&data, event)?;
            if batch_ids.insert(event.id().clone()) == false {
                return Err(format!("Event {} appears twice in the batch", event.id()).into());
            }
            if let Some(uid) = event.uid() {
                if batch_uids.insert((event.owner().to_string(), uid.to_string())) == false {
                    return Err(format!("UID {} appears twice in the batch", uid).into());
                }
            }
        }

        let count = events.len();
        self.commit(&mut data, |data| {
            for event in events {
                data.events.insert(event.id().clone(), event);
            }
        })?;
        log::debug!("Stored a batch of {} events", count);
        Ok(())
    }

    async fn update(&self, event: Event) -> Result<(), StoreError> {
        #[cfg(any(test, feature = "local_store_mocks"))]
        self.mock_check(MockBehaviour::can_update)?;

        let mut data = self.lock();
        if data.events.contains_key(event.id()) == false {
            return Err(format!("Cannot update unknown event {}", event.id()).into());
        }
        if let Some(uid) = event.uid() {
            let taken_by_another = data.events.values()
                .any(|ev| ev.id() != event.id() && ev.owner() == event.owner() && ev.uid() == Some(uid));
            if taken_by_another {
                return Err(format!("Another event of {} already has UID {}", event.owner(), uid).into());
            }
        }
        self.commit(&mut data, |data| {
            data.events.insert(event.id().clone(), event);
        })
    }

    async fn delete(&self, id: &EventId) -> Result<(), StoreError> {
        #[cfg(any(test, feature = "local_store_mocks"))]
        self.mock_check(MockBehaviour::can_delete)?;

        let mut data = self.lock();
        if data.events.contains_key(id) == false {
            return Err(format!("Cannot delete unknown event {}", id).into());
        }
        self.commit(&mut data, |data| {
            data.events.remove(id);
        })
    }
}

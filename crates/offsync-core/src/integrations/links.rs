//! In-memory index of [`GoogleResourceLink`]s backed by a [`SyncStore`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{EntityId, GoogleResourceLink, ResourceType};
use crate::storage::{PersistError, SyncStore};

pub struct LinkStore {
    links: HashMap<(EntityId, ResourceType), GoogleResourceLink>,
    store: Arc<dyn SyncStore>,
}

impl LinkStore {
    pub fn open(store: Arc<dyn SyncStore>) -> Result<Self, PersistError> {
        let links = store
            .load_links()?
            .into_iter()
            .map(|l| ((l.local_id.clone(), l.resource_type), l))
            .collect();
        Ok(Self { links, store })
    }

    pub fn get(&self, local_id: &str, resource_type: ResourceType) -> Option<&GoogleResourceLink> {
        self.links.get(&(local_id.to_string(), resource_type))
    }

    /// Reverse lookup by remote resource id.
    pub fn by_remote(&self, resource_type: ResourceType, remote_id: &str) -> Option<&GoogleResourceLink> {
        self.links
            .values()
            .find(|l| l.resource_type == resource_type && l.remote_id == remote_id)
    }

    /// Persist first; the index only changes once the write succeeded.
    pub fn save(&mut self, link: GoogleResourceLink) -> Result<(), PersistError> {
        self.store.save_link(&link)?;
        self.links.insert((link.local_id.clone(), link.resource_type), link);
        Ok(())
    }

    pub fn remove(&mut self, local_id: &str, resource_type: ResourceType) -> Result<Option<GoogleResourceLink>, PersistError> {
        self.store.delete_link(local_id, resource_type)?;
        Ok(self.links.remove(&(local_id.to_string(), resource_type)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &GoogleResourceLink> {
        self.links.values()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

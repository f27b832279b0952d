use crate::config::PurgerSettings;
use crate::dispatcher::Dispatcher;
use crate::errors::ValidationError;
use crate::invalidation::InvalidationTypes;
use indexmap::IndexMap;
use std::sync::Arc;

/// All configured purger instances, by id, in configuration order.
pub struct Purgers {
    map: IndexMap<String, Arc<Dispatcher>>,
}

impl Purgers {
    /// Validates every instance; any invalid instance fails the whole set.
    pub fn try_new(
        settings: Vec<PurgerSettings>,
        types: &InvalidationTypes,
    ) -> Result<Self, ValidationError> {
        let dispatchers = settings
            .into_iter()
            .map(|s| Dispatcher::new(s, types.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_dispatchers(dispatchers)
    }

    pub fn from_dispatchers(dispatchers: Vec<Dispatcher>) -> Result<Self, ValidationError> {
        let mut map = IndexMap::new();
        for dispatcher in dispatchers {
            let id = dispatcher.id().to_string();
            if map.contains_key(&id) {
                return Err(ValidationError::DuplicateId(id));
            }
            map.insert(id, Arc::new(dispatcher));
        }

        Ok(Purgers { map })
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Dispatcher>> {
        self.map.get(id)
    }

    pub fn first(&self) -> Option<&Arc<Dispatcher>> {
        self.map.first().map(|(_, dispatcher)| dispatcher)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Dispatcher>> {
        self.map.values()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

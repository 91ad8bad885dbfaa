use std::sync::Arc;

use crate::config::Config;
use crate::notifier::Notifier;
use crate::store::{Entity, Repository, Store};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Config,
}

impl AppState {
    pub fn repo<T: Entity>(&self) -> Repository<T> {
        Repository::new(self.store.clone())
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Arc;

    use super::AppState;
    use crate::config::Config;
    use crate::notifier::testing::RecordingNotifier;
    use crate::store::{MemoryStore, UNIQUE_FIELDS};

    /// State backed by `MemoryStore`, with the notifier returned for assertions.
    pub fn memory_state() -> (AppState, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let state = AppState {
            store: Arc::new(MemoryStore::new().with_unique_fields(UNIQUE_FIELDS)),
            notifier: notifier.clone(),
            config: Config::for_tests(),
        };
        (state, notifier)
    }
}

//! Hardware mixer controls and the registry of open handles.
//!
//! Opening a mixer control is expensive (it loads the whole card's element
//! list), so handles are opened once per `(card, control)` and shared by
//! every track that refers to them. The registry has its own lock,
//! independent of the graph snapshot lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::MixerError;

/// One open mixer element.
pub trait MixerControl: Send + Sync {
    /// Name of the currently selected enumerated item.
    fn enum_value(&self) -> Result<String, MixerError>;

    /// Select an enumerated item by name.
    fn set_enum_value(&self, item: &str) -> Result<(), MixerError>;

    /// Current level as a percentage of the control's range.
    fn level(&self) -> Result<i64, MixerError>;

    /// Set the level as a percentage of the control's range.
    fn set_level(&self, percent: i64) -> Result<(), MixerError>;
}

/// Opens mixer controls on a sound card.
pub trait MixerBackend: Send + Sync {
    fn open(&self, card: u32, control: &str) -> Result<Arc<dyn MixerControl>, MixerError>;
}

/// Process-wide cache of open mixer controls.
pub struct MixerRegistry {
    backend: Box<dyn MixerBackend>,
    handles: Mutex<HashMap<(u32, String), Arc<dyn MixerControl>>>,
}

impl MixerRegistry {
    pub fn new(backend: impl MixerBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// The open handle for `(card, control)`, opening it on first use.
    pub fn control(&self, card: u32, control: &str) -> Result<Arc<dyn MixerControl>, MixerError> {
        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = (card, control.to_string());
        if let Some(handle) = handles.get(&key) {
            return Ok(Arc::clone(handle));
        }

        debug!("Opening mixer control {:?} on card {}", control, card);
        let handle = self.backend.open(card, control)?;
        handles.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn open_count(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

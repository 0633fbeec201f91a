use std::sync::{Arc, Mutex, MutexGuard};

use alsa::mixer::{Mixer, Selem, SelemChannelId, SelemId};
use tracing::debug;

use crate::error::MixerError;
use crate::mixer::{MixerBackend, MixerControl};

/// Opens simple mixer elements on `hw:<card>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlsaMixer;

impl AlsaMixer {
    pub fn new() -> Self {
        Self
    }
}

impl MixerBackend for AlsaMixer {
    fn open(&self, card: u32, control: &str) -> Result<Arc<dyn MixerControl>, MixerError> {
        let open_error = |message: String| MixerError::Open {
            card,
            control: control.to_string(),
            message,
        };

        let device = format!("hw:{}", card);
        let mixer = Mixer::new(&device, false).map_err(|e| open_error(e.to_string()))?;
        let id = SelemId::new(control, 0);
        if mixer.find_selem(&id).is_none() {
            return Err(open_error(format!("no simple element on {}", device)));
        }
        debug!("Opened {:?} on {}", control, device);

        Ok(Arc::new(AlsaControl {
            mixer: Mutex::new(mixer),
            control: control.to_string(),
        }))
    }
}

/// One simple mixer element. The element is looked up again on every call
/// since `Selem` borrows the mixer handle.
struct AlsaControl {
    mixer: Mutex<Mixer>,
    control: String,
}

impl AlsaControl {
    fn io(&self, message: impl ToString) -> MixerError {
        MixerError::Io {
            control: self.control.clone(),
            message: message.to_string(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_selem<T>(
        &self,
        f: impl FnOnce(&Selem<'_>) -> Result<T, MixerError>,
    ) -> Result<T, MixerError> {
        let mixer = self.lock();
        // Pick up changes made by other mixer clients
        mixer.handle_events().map_err(|e| self.io(e))?;
        let selem = mixer
            .find_selem(&SelemId::new(&self.control, 0))
            .ok_or_else(|| self.io("element went away"))?;
        f(&selem)
    }

    fn items(&self, selem: &Selem<'_>) -> Result<Vec<String>, MixerError> {
        if !selem.is_enumerated() {
            return Err(self.io("not an enumerated control"));
        }
        selem
            .iter_enum()
            .map_err(|e| self.io(e))?
            .map(|item| item.map_err(|e| self.io(e)))
            .collect()
    }
}

fn to_percent(raw: i64, (min, max): (i64, i64)) -> i64 {
    if max <= min {
        return 0;
    }
    ((raw - min) * 100 + (max - min) / 2) / (max - min)
}

fn from_percent(percent: i64, (min, max): (i64, i64)) -> i64 {
    min + (percent.clamp(0, 100) * (max - min) + 50) / 100
}

impl MixerControl for AlsaControl {
    fn enum_value(&self) -> Result<String, MixerError> {
        self.with_selem(|selem| {
            let items = self.items(selem)?;
            let index = selem
                .get_enum_item(SelemChannelId::mono())
                .map_err(|e| self.io(e))?;
            items
                .get(index as usize)
                .cloned()
                .ok_or_else(|| self.io(format!("item index {} out of range", index)))
        })
    }

    fn set_enum_value(&self, item: &str) -> Result<(), MixerError> {
        self.with_selem(|selem| {
            let index = self
                .items(selem)?
                .iter()
                .position(|i| i == item)
                .ok_or_else(|| MixerError::UnknownSetting {
                    control: self.control.clone(),
                    setting: item.to_string(),
                })?;
            selem
                .set_enum_item(SelemChannelId::mono(), index as u32)
                .map_err(|e| self.io(e))
        })
    }

    fn level(&self) -> Result<i64, MixerError> {
        self.with_selem(|selem| {
            if selem.has_playback_volume() {
                let raw = selem
                    .get_playback_volume(SelemChannelId::mono())
                    .map_err(|e| self.io(e))?;
                Ok(to_percent(raw, selem.get_playback_volume_range()))
            } else if selem.has_capture_volume() {
                let raw = selem
                    .get_capture_volume(SelemChannelId::mono())
                    .map_err(|e| self.io(e))?;
                Ok(to_percent(raw, selem.get_capture_volume_range()))
            } else {
                Err(self.io("not a volume control"))
            }
        })
    }

    fn set_level(&self, percent: i64) -> Result<(), MixerError> {
        self.with_selem(|selem| {
            if selem.has_playback_volume() {
                let raw = from_percent(percent, selem.get_playback_volume_range());
                selem.set_playback_volume_all(raw).map_err(|e| self.io(e))
            } else if selem.has_capture_volume() {
                let raw = from_percent(percent, selem.get_capture_volume_range());
                selem.set_capture_volume_all(raw).map_err(|e| self.io(e))
            } else {
                Err(self.io("not a volume control"))
            }
        })
    }
}

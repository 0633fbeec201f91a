pub mod memory;

#[cfg(feature = "alsa")]
pub mod alsa;
#[cfg(feature = "jack")]
pub mod jack;

pub use self::memory::{MemoryGraph, MemoryMixer};

#[cfg(feature = "alsa")]
pub use self::alsa::AlsaMixer;
#[cfg(feature = "jack")]
pub use self::jack::JackService;

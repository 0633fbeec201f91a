//! portman - keystroke-driven audio routing
//!
//! Mirrors a JACK graph, turns connections and hardware mixer settings into
//! boolean tracks, and binds tracks to single keys that are re-derived
//! whenever the graph settles.

pub mod backends;
pub mod control;
pub mod debounce;
pub mod error;
pub mod layout;
pub mod mirror;
pub mod mixer;
pub mod service;
pub mod session;
pub mod setup;
pub mod terminal;
pub mod track;
pub mod types;

pub use control::{BindingSource, Bindings, ControlLoop, LoopState};
pub use debounce::{ReorderDebouncer, Subscription, DEFAULT_SETTLE};
pub use error::*;
pub use layout::{stereo_out_ref, stereo_outs, stereo_speaker_ref, stereo_speakers};
pub use mirror::GraphMirror;
pub use mixer::{MixerBackend, MixerControl, MixerRegistry};
pub use service::{GraphEvent, GraphService, IdentityResolver, PortListing};
pub use session::Session;
pub use setup::StudioSetup;
pub use track::{ConnectionTrack, GraphHandle};
pub use types::*;

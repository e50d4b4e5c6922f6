//! Audio hand-off to the external mixer

pub mod mixbus;

pub use mixbus::{create_shared_bus, AudioSource, MixBus, MixFrame, SharedMixBus};

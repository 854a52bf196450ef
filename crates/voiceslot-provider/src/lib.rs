//! `VoiceServiceProviderPort` adapters, one per upstream vendor, plus an
//! in-memory fake for tests and local development.

pub mod cartesia;
pub mod elevenlabs;
pub mod fake;

pub use cartesia::CartesiaProvider;
pub use elevenlabs::ElevenLabsProvider;
pub use fake::FakeVoiceServiceProvider;

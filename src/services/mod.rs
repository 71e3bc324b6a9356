pub mod blip;
pub mod captioner;
pub mod hub;

pub use blip::{BlipCaptioner, ModelLoadError};
pub use captioner::{ImageCaptioner, MockCaptioner, UnavailableCaptioner};
pub use hub::HubClient;

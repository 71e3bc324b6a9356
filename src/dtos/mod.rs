pub mod captions;

pub use captions::CaptionResponse;

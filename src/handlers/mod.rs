pub mod captions;
pub mod health;
pub mod pages;

pub use captions::upload_image;
pub use health::health_check;
pub use pages::index;

pub mod backup;
pub mod cloud_sync;
pub mod content_type;
pub mod error;
pub mod file_things;
pub mod gallery;
pub mod guards;
pub mod image_operations;
pub mod models;
pub mod phash;
pub mod power;
pub mod schedule;
pub mod scheduler;
pub mod slideshow;
pub mod store;

pub use error::Error;
pub use file_things::{data_path, upload_path};
pub use gallery::Gallery;
pub use image_operations::ImageSemaphore;
pub use slideshow::SlideshowCoordinator;
pub use store::JsonStore;

pub mod api_client;
pub mod classifier;
pub mod controller;
pub mod error;
pub mod lines;
pub mod log_buffer;
pub mod opener;
pub mod transport;
pub mod types;

pub use api_client::{AuthApi, HttpAuthApi};
pub use classifier::OutputClassifier;
pub use controller::SessionController;
pub use error::{AuthError, AuthResult};
pub use log_buffer::LogBuffer;
pub use opener::{NoBrowser, SystemBrowser, UrlOpener};
pub use types::*;

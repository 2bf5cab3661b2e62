pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod live;

pub use config::{derive_ws_url, Args, ViewerConfig};
pub use engine::{SpotView, SyncEngine};
pub use error::ViewerError;
pub use fetch::SpotApi;
pub use live::{LiveEvent, LiveHandle};

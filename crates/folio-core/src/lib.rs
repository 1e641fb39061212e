pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::{FolioConfig, RuntimeOptions};
pub use error::{FolioError, Result};
pub use events::{CollectingSink, DomainEvent, EventSink};
pub use types::*;

pub mod config;
pub mod error;
pub mod events;
pub mod journal;
pub mod manager;
pub mod types;

pub use config::*;
pub use error::*;
pub use events::{EventBus, EventSubscriber, MediaEvent, MediaEventType};
pub use journal::MediaJournal;
pub use manager::*;
pub use types::*;

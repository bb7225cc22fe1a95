pub mod coordinator;
pub mod directory;
pub mod error;
pub mod history;
pub mod state;
pub mod store;

pub use coordinator::{
    CoordinatorOptions, ExchangeHandle, Phase, StreamingCoordinator, ATTACHMENT_ONLY_MARKER,
    TRANSPORT_FAILURE_MESSAGE,
};
pub use directory::SessionDirectory;
pub use error::SessionError;
pub use history::HistoryLoader;
pub use state::{StreamingState, StreamingStatePublisher};
pub use store::{SessionMessageStore, SessionMessagesBlock, StoreChange, MAX_BLOCK_MESSAGES};

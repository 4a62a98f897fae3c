pub mod engine;
pub mod frame;
pub mod sink;
pub mod state;

pub use engine::{FileSource, TransferEngine, UploadStep};
pub use frame::{ControlMessage, Frame};
pub use sink::{DirectorySinks, MemorySinks, Sink, SinkFactory};
pub use state::{ChatMessage, Direction, HistoryEntry, Sender, TransferSession, TransferStatus};

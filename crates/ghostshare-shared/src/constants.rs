use std::time::Duration;

/// Maximum number of participants admitted to one room
pub const ROOM_CAPACITY: usize = 2;

/// Size of one binary file chunk on the data channel (16 KiB)
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Frames shorter than this are tried as JSON control messages first
pub const CONTROL_FRAME_THRESHOLD: usize = 5000;

/// Pause between two chunk sends. Stands in for receiver-driven flow control.
pub const CHUNK_PACING: Duration = Duration::from_millis(5);

/// How long a completed or aborted transfer stays visible before going idle
pub const DISPLAY_RESET_DELAY: Duration = Duration::from_millis(3000);

/// Default HTTP/WebSocket port of the broker
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Path of the broker's WebSocket endpoint
pub const WS_PATH: &str = "/ws";

/// Public STUN server used when none is configured
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

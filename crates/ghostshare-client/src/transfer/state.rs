use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Idle,
    Uploading,
    Downloading,
    Completed,
    /// The link died before `end`
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferSession {
    pub file_name: String,
    pub file_size: u64,
    pub direction: Direction,
    pub bytes_transferred: u64,
    pub status: TransferStatus,
    pub progress: u8,
}

impl TransferSession {
    pub fn new(file_name: String, file_size: u64, direction: Direction) -> Self {
        let status = match direction {
            Direction::Sent => TransferStatus::Uploading,
            Direction::Received => TransferStatus::Downloading,
        };
        Self {
            file_name,
            file_size,
            direction,
            bytes_transferred: 0,
            status,
            progress: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            TransferStatus::Uploading | TransferStatus::Downloading
        )
    }

    /// Count `n` more bytes and recompute progress. Never moves backwards.
    pub fn advance(&mut self, n: u64) {
        self.bytes_transferred = self.bytes_transferred.saturating_add(n).min(self.file_size);
        self.progress = self
            .progress
            .max(percent(self.bytes_transferred, self.file_size));
    }

    pub fn complete(&mut self) {
        self.status = TransferStatus::Completed;
        self.progress = 100;
    }

    pub fn abort(&mut self) {
        self.status = TransferStatus::Aborted;
    }
}

/// `min(100, round(done / total * 100))`; an empty file counts as done.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (done as f64 / total as f64 * 100.0).round();
    pct.min(100.0) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Me,
    Peer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    pub direction: Direction,
    pub timestamp: i64,
}

//! File transfer and chat over one data channel.
//!
//! The engine owns one upload slot and one download slot. It does no I/O on
//! the channel itself: outgoing frames are returned to the caller, inbound
//! frames are fed in through [`TransferEngine::handle_frame`]. State changes
//! are published as [`SessionEvent`]s.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ghostshare_shared::constants::{CHUNK_SIZE, CONTROL_FRAME_THRESHOLD, DISPLAY_RESET_DELAY};

use crate::error::{ClientError, Result};
use crate::events::SessionEvent;
use crate::transfer::frame::{classify, ControlMessage, Frame};
use crate::transfer::sink::{sanitize_file_name, Sink, SinkFactory};
use crate::transfer::state::{
    ChatMessage, Direction, HistoryEntry, Sender, TransferSession, TransferStatus,
};

pub type FileSource = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Next frame of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStep {
    Chunk(Bytes),
    /// Final `end` frame; the upload is complete once it is sent.
    End(Bytes),
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Default)]
struct Slot {
    session: Option<TransferSession>,
    reset_at: Option<Instant>,
}

impl Slot {
    fn begin(&mut self, session: TransferSession) {
        self.session = Some(session);
        self.reset_at = None;
    }

    fn finish(&mut self) {
        self.reset_at = Some(Instant::now() + DISPLAY_RESET_DELAY);
    }

    fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(TransferSession::is_active)
    }
}

pub struct TransferEngine {
    sinks: Arc<dyn SinkFactory>,
    events: mpsc::UnboundedSender<SessionEvent>,
    upload: Slot,
    source: Option<FileSource>,
    download: Slot,
    sink: Option<Box<dyn Sink>>,
    chat: Vec<ChatMessage>,
    history: Vec<HistoryEntry>,
}

impl TransferEngine {
    pub fn new(sinks: Arc<dyn SinkFactory>, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            sinks,
            events,
            upload: Slot::default(),
            source: None,
            download: Slot::default(),
            sink: None,
            chat: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn upload(&self) -> Option<&TransferSession> {
        self.upload.session.as_ref()
    }

    pub fn download(&self) -> Option<&TransferSession> {
        self.download.session.as_ref()
    }

    pub fn status(&self, direction: Direction) -> TransferStatus {
        let slot = match direction {
            Direction::Sent => &self.upload,
            Direction::Received => &self.download,
        };
        slot.session
            .as_ref()
            .map_or(TransferStatus::Idle, |s| s.status)
    }

    pub fn chat(&self) -> &[ChatMessage] {
        &self.chat
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn is_uploading(&self) -> bool {
        self.upload.is_active()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn publish(&self, direction: Direction) {
        let session = match direction {
            Direction::Sent => self.upload.session.clone(),
            Direction::Received => self.download.session.clone(),
        };
        self.emit(SessionEvent::Transfer { direction, session });
    }

    fn record_history(&mut self, file_name: &str, file_size: u64, direction: Direction) {
        let entry = HistoryEntry {
            id: Uuid::new_v4().to_string(),
            file_name: file_name.to_string(),
            file_size,
            direction,
            timestamp: now_millis(),
        };
        self.history.push(entry.clone());
        self.emit(SessionEvent::History(entry));
    }

    // ---- Upload ----

    /// Begin sending a file. Returns the `header` frame to broadcast.
    pub fn start_upload(
        &mut self,
        file_name: &str,
        file_size: u64,
        file_type: &str,
        source: FileSource,
    ) -> Result<Bytes> {
        if self.upload.is_active() {
            return Err(ClientError::TransferInProgress);
        }

        let header = ControlMessage::Header {
            file_name: file_name.to_string(),
            file_size,
            file_type: file_type.to_string(),
        }
        .encode()?;

        info!(file = %file_name, size = file_size, "Starting upload");
        self.upload.begin(TransferSession::new(
            file_name.to_string(),
            file_size,
            Direction::Sent,
        ));
        self.source = Some(Box::new(source.take(file_size)));
        self.record_history(file_name, file_size, Direction::Sent);
        self.publish(Direction::Sent);
        Ok(header)
    }

    /// Read the next chunk of the active upload.
    ///
    /// Progress is counted as soon as the chunk is produced. Returns `None`
    /// when no upload is running.
    pub async fn next_upload_step(&mut self) -> Result<Option<UploadStep>> {
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };

        let chunk = match read_chunk(source).await {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "Reading upload source failed");
                self.abort_upload();
                return Err(e.into());
            }
        };

        if chunk.is_empty() {
            self.source = None;
            if let Some(session) = self.upload.session.as_mut() {
                session.complete();
                info!(file = %session.file_name, bytes = session.bytes_transferred, "Upload complete");
            }
            self.upload.finish();
            self.publish(Direction::Sent);
            return Ok(Some(UploadStep::End(ControlMessage::End.encode()?)));
        }

        if let Some(session) = self.upload.session.as_mut() {
            session.advance(chunk.len() as u64);
        }
        self.publish(Direction::Sent);
        Ok(Some(UploadStep::Chunk(Bytes::from(chunk))))
    }

    /// Stop the running upload without sending `end`.
    pub fn abort_upload(&mut self) {
        if !self.upload.is_active() {
            return;
        }
        self.source = None;
        if let Some(session) = self.upload.session.as_mut() {
            warn!(file = %session.file_name, sent = session.bytes_transferred, "Upload aborted");
            session.abort();
        }
        self.upload.finish();
        self.publish(Direction::Sent);
    }

    // ---- Chat ----

    /// Record a local chat message and return its frame. Blank text yields
    /// `None`. Text whose frame would be read as a chunk is rejected.
    pub fn outgoing_chat(&mut self, text: &str) -> Result<Option<Bytes>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            sender: Sender::Me,
            timestamp: now_millis(),
        };
        let frame = ControlMessage::Chat {
            id: message.id.clone(),
            text: message.text.clone(),
            timestamp: message.timestamp,
        }
        .encode()?;
        if frame.len() >= CONTROL_FRAME_THRESHOLD {
            return Err(ClientError::MessageTooLong {
                len: frame.len(),
                max: CONTROL_FRAME_THRESHOLD - 1,
            });
        }

        self.chat.push(message.clone());
        self.emit(SessionEvent::Chat(message));
        Ok(Some(frame))
    }

    // ---- Inbound ----

    /// Handle one inbound data channel frame.
    pub async fn handle_frame(&mut self, data: Bytes) -> Result<()> {
        match classify(data) {
            Frame::Control(ControlMessage::Header {
                file_name,
                file_size,
                file_type,
            }) => self.on_header(&file_name, file_size, &file_type).await,
            Frame::Control(ControlMessage::End) => self.on_end().await,
            Frame::Control(ControlMessage::Chat {
                id,
                text,
                timestamp,
            }) => {
                let message = ChatMessage {
                    id,
                    text,
                    sender: Sender::Peer,
                    timestamp,
                };
                self.chat.push(message.clone());
                self.emit(SessionEvent::Chat(message));
                Ok(())
            }
            Frame::Chunk(chunk) => self.on_chunk(chunk).await,
        }
    }

    async fn on_header(&mut self, file_name: &str, file_size: u64, file_type: &str) -> Result<()> {
        if let Some(previous) = self.sink.take() {
            warn!("New header while a download is active, dropping the previous file");
            if let Err(e) = previous.close().await {
                debug!(error = %e, "Closing replaced download failed");
            }
        }

        let file_name = sanitize_file_name(file_name);
        info!(file = %file_name, size = file_size, kind = %file_type, "Incoming file");

        self.download.begin(TransferSession::new(
            file_name.clone(),
            file_size,
            Direction::Received,
        ));
        self.record_history(&file_name, file_size, Direction::Received);
        self.publish(Direction::Received);

        match self.sinks.open(&file_name, file_size).await {
            Ok(sink) => {
                self.sink = Some(sink);
                Ok(())
            }
            Err(e) => {
                self.fail_download().await;
                Err(ClientError::Sink(e))
            }
        }
    }

    async fn on_chunk(&mut self, chunk: Bytes) -> Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            debug!(len = chunk.len(), "Dropping chunk with no active download");
            return Ok(());
        };

        let remaining = self
            .download
            .session
            .as_ref()
            .map_or(0, |s| s.file_size.saturating_sub(s.bytes_transferred));
        let take = remaining.min(chunk.len() as u64) as usize;
        if take < chunk.len() {
            warn!(
                len = chunk.len(),
                kept = take,
                "Chunk overruns declared file size, dropping surplus"
            );
        }
        if take == 0 {
            return Ok(());
        }

        if let Err(e) = sink.write(&chunk[..take]).await {
            self.fail_download().await;
            return Err(ClientError::Sink(e));
        }

        if let Some(session) = self.download.session.as_mut() {
            session.advance(take as u64);
        }
        self.publish(Direction::Received);
        Ok(())
    }

    async fn on_end(&mut self) -> Result<()> {
        let Some(sink) = self.sink.take() else {
            debug!("Ignoring end with no active download");
            return Ok(());
        };

        if let Err(e) = sink.close().await {
            self.fail_download().await;
            return Err(ClientError::Sink(e));
        }

        if let Some(session) = self.download.session.as_mut() {
            session.complete();
            info!(file = %session.file_name, bytes = session.bytes_transferred, "Download complete");
        }
        self.download.finish();
        self.publish(Direction::Received);
        Ok(())
    }

    async fn fail_download(&mut self) {
        if let Some(sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Closing failed download");
            }
        }
        if let Some(session) = self.download.session.as_mut() {
            session.abort();
        }
        self.download.finish();
        self.publish(Direction::Received);
    }

    /// The sending peer went away: close any open download.
    pub async fn abort_download(&mut self) {
        if !self.download.is_active() {
            return;
        }
        if let Some(session) = self.download.session.as_ref() {
            warn!(
                file = %session.file_name,
                received = session.bytes_transferred,
                "Download aborted, peer gone"
            );
        }
        self.fail_download().await;
    }

    // ---- Display reset ----

    /// Earliest pending reset of a finished transfer to idle.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.upload.reset_at, self.download.reset_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Return finished transfers whose display delay has passed to idle.
    pub fn expire(&mut self, now: Instant) {
        for direction in [Direction::Sent, Direction::Received] {
            let slot = match direction {
                Direction::Sent => &mut self.upload,
                Direction::Received => &mut self.download,
            };
            if slot.reset_at.is_some_and(|at| at <= now) {
                slot.session = None;
                slot.reset_at = None;
                self.publish(direction);
            }
        }
    }
}

async fn read_chunk(source: &mut FileSource) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut filled = 0;
    while filled < CHUNK_SIZE {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::sink::MemorySinks;
    use std::io::Cursor;

    struct Harness {
        engine: TransferEngine,
        sinks: MemorySinks,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    }

    fn harness() -> Harness {
        let sinks = MemorySinks::new();
        let (tx, rx) = mpsc::unbounded_channel();
        Harness {
            engine: TransferEngine::new(Arc::new(sinks.clone()), tx),
            sinks,
            events: rx,
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Run a whole upload, returning every frame in send order.
    async fn upload_all(engine: &mut TransferEngine, name: &str, data: Vec<u8>) -> Vec<Bytes> {
        let header = engine
            .start_upload(name, data.len() as u64, "", Box::new(Cursor::new(data)))
            .unwrap();
        let mut frames = vec![header];
        while let Some(step) = engine.next_upload_step().await.unwrap() {
            match step {
                UploadStep::Chunk(chunk) => frames.push(chunk),
                UploadStep::End(end) => frames.push(end),
            }
        }
        frames
    }

    fn download_progress(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<u8> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::Transfer {
                direction: Direction::Received,
                session: Some(session),
            } = event
            {
                seen.push(session.progress);
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_chunk_count_and_byte_exact_reassembly() {
        for size in [1, CHUNK_SIZE, CHUNK_SIZE + 1, 3 * CHUNK_SIZE + 17] {
            let mut sender = harness();
            let mut receiver = harness();
            let data = payload(size);

            let frames = upload_all(&mut sender.engine, "f.bin", data.clone()).await;
            // header + chunks + end
            assert_eq!(frames.len() - 2, size.div_ceil(CHUNK_SIZE));

            for frame in frames {
                receiver.engine.handle_frame(frame).await.unwrap();
            }
            assert_eq!(receiver.sinks.get("f.bin").unwrap(), data);
            let download = receiver.engine.download().unwrap();
            assert_eq!(download.bytes_transferred, size as u64);
            assert_eq!(download.status, TransferStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_at_100() {
        let mut sender = harness();
        let mut receiver = harness();

        let frames = upload_all(&mut sender.engine, "p.bin", payload(5 * CHUNK_SIZE + 3)).await;
        for frame in frames {
            receiver.engine.handle_frame(frame).await.unwrap();
        }

        let seen = download_progress(&mut receiver.events);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert_eq!(seen.last(), Some(&100));
        assert_eq!(sender.engine.upload().unwrap().progress, 100);
    }

    #[tokio::test]
    async fn test_x_txt_scenario() {
        let mut a = harness();
        let mut b = harness();

        let frames = upload_all(&mut a.engine, "x.txt", payload(20000)).await;
        assert_eq!(frames.len(), 4);
        for frame in frames {
            b.engine.handle_frame(frame).await.unwrap();
        }

        assert_eq!(b.sinks.get("x.txt").unwrap().len(), 20000);
        assert_eq!(a.engine.history().len(), 1);
        assert_eq!(a.engine.history()[0].direction, Direction::Sent);
        assert_eq!(b.engine.history().len(), 1);
        assert_eq!(b.engine.history()[0].direction, Direction::Received);
        assert_eq!(b.engine.history()[0].file_size, 20000);
    }

    #[tokio::test]
    async fn test_chat_interleaved_with_chunks_never_reaches_sink() {
        let mut sender = harness();
        let mut receiver = harness();
        let data = payload(3 * CHUNK_SIZE);

        let frames = upload_all(&mut sender.engine, "c.bin", data.clone()).await;
        for frame in frames {
            receiver.engine.handle_frame(frame).await.unwrap();
            let chat = sender.engine.outgoing_chat("between chunks").unwrap().unwrap();
            receiver.engine.handle_frame(chat).await.unwrap();
        }

        assert_eq!(receiver.sinks.get("c.bin").unwrap(), data);
        assert_eq!(receiver.engine.chat().len(), 5);
        assert!(receiver.engine.chat().iter().all(|m| m.sender == Sender::Peer));
    }

    #[tokio::test]
    async fn test_chat_arrives_with_sender_timestamp() {
        let mut receiver = harness();
        let frame = ControlMessage::Chat {
            id: "m1".into(),
            text: "hi".into(),
            timestamp: 1_700_000_000_000,
        }
        .encode()
        .unwrap();

        receiver.engine.handle_frame(frame).await.unwrap();
        assert_eq!(
            receiver.engine.chat(),
            &[ChatMessage {
                id: "m1".into(),
                text: "hi".into(),
                sender: Sender::Peer,
                timestamp: 1_700_000_000_000,
            }]
        );
    }

    #[tokio::test]
    async fn test_blank_chat_is_not_sent() {
        let mut h = harness();
        assert!(h.engine.outgoing_chat("   ").unwrap().is_none());
        assert!(h.engine.chat().is_empty());

        let frame = h.engine.outgoing_chat(" hello ").unwrap().unwrap();
        assert_eq!(h.engine.chat()[0].sender, Sender::Me);
        assert!(matches!(classify(frame), Frame::Control(ControlMessage::Chat { .. })));
    }

    #[tokio::test]
    async fn test_oversized_chat_is_rejected() {
        let mut h = harness();
        let err = h
            .engine
            .outgoing_chat(&"x".repeat(CONTROL_FRAME_THRESHOLD))
            .unwrap_err();
        assert!(matches!(err, ClientError::MessageTooLong { .. }));
        assert!(h.engine.chat().is_empty());
        assert!(h.events.try_recv().is_err());

        let frame = h.engine.outgoing_chat(&"x".repeat(4000)).unwrap().unwrap();
        assert!(frame.len() < CONTROL_FRAME_THRESHOLD);
        assert!(matches!(classify(frame), Frame::Control(ControlMessage::Chat { .. })));
    }

    #[tokio::test]
    async fn test_surplus_beyond_declared_size_is_dropped() {
        let mut receiver = harness();
        let header = ControlMessage::Header {
            file_name: "small".into(),
            file_size: 10,
            file_type: String::new(),
        }
        .encode()
        .unwrap();

        receiver.engine.handle_frame(header).await.unwrap();
        receiver
            .engine
            .handle_frame(Bytes::from(payload(CHUNK_SIZE)))
            .await
            .unwrap();
        receiver
            .engine
            .handle_frame(Bytes::from(payload(CHUNK_SIZE)))
            .await
            .unwrap();
        receiver
            .engine
            .handle_frame(ControlMessage::End.encode().unwrap())
            .await
            .unwrap();

        let download = receiver.engine.download().unwrap();
        assert_eq!(download.bytes_transferred, 10);
        assert_eq!(download.status, TransferStatus::Completed);
        assert_eq!(receiver.sinks.get("small").unwrap(), payload(10));
    }

    #[tokio::test]
    async fn test_upload_stops_at_declared_size() {
        let mut sender = harness();
        let header = sender
            .engine
            .start_upload("grown.bin", 100, "", Box::new(Cursor::new(payload(CHUNK_SIZE))))
            .unwrap();
        assert!(matches!(classify(header), Frame::Control(ControlMessage::Header { .. })));

        match sender.engine.next_upload_step().await.unwrap() {
            Some(UploadStep::Chunk(chunk)) => assert_eq!(chunk.len(), 100),
            other => panic!("unexpected step: {other:?}"),
        }
        assert!(matches!(
            sender.engine.next_upload_step().await.unwrap(),
            Some(UploadStep::End(_))
        ));
        assert_eq!(sender.engine.upload().unwrap().bytes_transferred, 100);
    }

    #[tokio::test]
    async fn test_chunk_without_session_is_dropped() {
        let mut h = harness();
        h.engine
            .handle_frame(Bytes::from(payload(CHUNK_SIZE)))
            .await
            .unwrap();
        assert!(h.engine.download().is_none());
        assert!(h.sinks.is_empty());
    }

    #[tokio::test]
    async fn test_zero_byte_file() {
        let mut sender = harness();
        let mut receiver = harness();

        let frames = upload_all(&mut sender.engine, "empty", Vec::new()).await;
        assert_eq!(frames.len(), 2);
        for frame in frames {
            receiver.engine.handle_frame(frame).await.unwrap();
        }

        assert_eq!(receiver.sinks.get("empty").unwrap(), Vec::<u8>::new());
        assert_eq!(receiver.engine.download().unwrap().progress, 100);
    }

    #[tokio::test]
    async fn test_second_upload_rejected_while_running() {
        let mut h = harness();
        h.engine
            .start_upload("a", 10, "", Box::new(Cursor::new(payload(10))))
            .unwrap();
        let err = h
            .engine
            .start_upload("b", 10, "", Box::new(Cursor::new(payload(10))))
            .unwrap_err();
        assert!(matches!(err, ClientError::TransferInProgress));
    }

    #[tokio::test]
    async fn test_link_death_aborts_download() {
        let mut sender = harness();
        let mut receiver = harness();

        let frames = upload_all(&mut sender.engine, "cut.bin", payload(2 * CHUNK_SIZE)).await;
        // header and first chunk only
        for frame in frames.into_iter().take(2) {
            receiver.engine.handle_frame(frame).await.unwrap();
        }
        receiver.engine.abort_download().await;

        assert_eq!(receiver.engine.status(Direction::Received), TransferStatus::Aborted);
        // Late chunks no longer reach a sink.
        receiver
            .engine
            .handle_frame(Bytes::from(payload(CHUNK_SIZE)))
            .await
            .unwrap();
        assert_eq!(receiver.engine.download().unwrap().bytes_transferred, CHUNK_SIZE as u64);
    }

    #[tokio::test]
    async fn test_new_header_replaces_active_download() {
        let mut receiver = harness();
        let header = |name: &str| {
            ControlMessage::Header {
                file_name: name.into(),
                file_size: 10000,
                file_type: String::new(),
            }
            .encode()
            .unwrap()
        };

        receiver.engine.handle_frame(header("first")).await.unwrap();
        receiver.engine.handle_frame(Bytes::from(payload(6000))).await.unwrap();
        receiver.engine.handle_frame(header("second")).await.unwrap();

        assert_eq!(receiver.engine.download().unwrap().file_name, "second");
        assert_eq!(receiver.engine.download().unwrap().bytes_transferred, 0);
        assert_eq!(receiver.engine.history().len(), 2);
    }

    #[tokio::test]
    async fn test_finished_transfer_resets_to_idle() {
        let mut sender = harness();
        upload_all(&mut sender.engine, "r.bin", payload(100)).await;
        assert_eq!(sender.engine.status(Direction::Sent), TransferStatus::Completed);

        let deadline = sender.engine.next_deadline().unwrap();
        sender.engine.expire(deadline - std::time::Duration::from_millis(1));
        assert_eq!(sender.engine.status(Direction::Sent), TransferStatus::Completed);

        sender.engine.expire(deadline);
        assert_eq!(sender.engine.status(Direction::Sent), TransferStatus::Idle);
        assert!(sender.engine.next_deadline().is_none());
    }
}

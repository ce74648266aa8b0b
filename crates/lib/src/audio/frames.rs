//! Ordered frame queue between a capture device and the socket task.
//!
//! A bounded channel backed by an overflow backlog: `push` never blocks and never drops.
//! Items in the channel are always older than items in the backlog, and both ends touch
//! the backlog only while holding the shared lock, so the receiver sees capture order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

/// One chunk of encoded audio, numbered in capture order from 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub seq: u64,
    pub data: Vec<u8>,
}

#[derive(Debug)]
enum StreamItem {
    Frame(AudioFrame),
    End,
}

#[derive(Default)]
struct Shared {
    backlog: VecDeque<StreamItem>,
    next_seq: u64,
    closed: bool,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// Create a queue whose channel holds `capacity` frames before spilling into the backlog.
pub fn frame_queue(capacity: usize) -> (FrameProducer, FrameReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Mutex::new(Shared::default()));
    (
        FrameProducer {
            tx,
            shared: shared.clone(),
        },
        FrameReceiver {
            rx,
            shared,
            done: false,
        },
    )
}

/// Device side of the queue. Cheap to clone; safe to call from a non-async callback thread.
#[derive(Clone)]
pub struct FrameProducer {
    tx: mpsc::Sender<StreamItem>,
    shared: Arc<Mutex<Shared>>,
}

impl FrameProducer {
    /// Queue a frame. Returns false once the queue has been finished.
    pub fn push(&self, data: Vec<u8>) -> bool {
        if data.is_empty() {
            return true;
        }
        let mut shared = lock(&self.shared);
        if shared.closed {
            return false;
        }
        let seq = shared.next_seq;
        shared.next_seq += 1;
        self.enqueue(&mut shared, StreamItem::Frame(AudioFrame { seq, data }));
        true
    }

    /// Number of frames accepted so far.
    pub fn produced(&self) -> u64 {
        lock(&self.shared).next_seq
    }

    /// Mark the end of the stream. Frames pushed afterwards are refused.
    pub fn finish(&self) {
        let mut shared = lock(&self.shared);
        if shared.closed {
            return;
        }
        shared.closed = true;
        self.enqueue(&mut shared, StreamItem::End);
    }

    fn enqueue(&self, shared: &mut Shared, item: StreamItem) {
        while let Some(front) = shared.backlog.pop_front() {
            match self.tx.try_send(front) {
                Ok(()) => {}
                Err(TrySendError::Full(front)) => {
                    shared.backlog.push_front(front);
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    shared.backlog.clear();
                    return;
                }
            }
        }
        if !shared.backlog.is_empty() {
            shared.backlog.push_back(item);
            return;
        }
        match self.tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(item)) => shared.backlog.push_back(item),
            Err(TrySendError::Closed(_)) => log::debug!("audio frame dropped: receiver gone"),
        }
    }
}

/// Socket side of the queue.
pub struct FrameReceiver {
    rx: mpsc::Receiver<StreamItem>,
    shared: Arc<Mutex<Shared>>,
    done: bool,
}

impl FrameReceiver {
    /// Next frame in capture order; `None` after the end marker or once every producer is gone.
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        if self.done {
            return None;
        }
        let ready = {
            let mut shared = lock(&self.shared);
            match self.rx.try_recv() {
                Ok(item) => Some(item),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    shared.backlog.pop_front()
                }
            }
        };
        let item = match ready {
            Some(item) => Some(item),
            None => self.rx.recv().await,
        };
        match item {
            Some(StreamItem::Frame(frame)) => Some(frame),
            Some(StreamItem::End) | None => {
                self.done = true;
                None
            }
        }
    }
}

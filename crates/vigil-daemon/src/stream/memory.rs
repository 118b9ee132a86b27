//! In-process partitioned log

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{SourceRecord, TelemetrySource};
use crate::error::StreamResult;

/// Partitions used by [`MemoryLog::default`].
pub const DEFAULT_PARTITIONS: usize = 4;

struct LogInner {
    offsets: Vec<i64>,
    subscribers: Vec<mpsc::UnboundedSender<SourceRecord>>,
    closed: bool,
}

/// A partitioned log held in memory.
///
/// Every subscriber gets every record appended after it subscribed, in
/// append order. Records with the same key land in the same partition.
#[derive(Clone)]
pub struct MemoryLog {
    inner: Arc<Mutex<LogInner>>,
}

impl MemoryLog {
    pub fn new(partitions: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogInner {
                offsets: vec![0; partitions.max(1)],
                subscribers: Vec::new(),
                closed: false,
            })),
        }
    }

    pub fn partitions(&self) -> usize {
        self.inner.lock().offsets.len()
    }

    /// Append a record; returns its `(partition, offset)`.
    ///
    /// Subscribers whose reader was dropped are forgotten.
    pub fn append(&self, key: Option<&[u8]>, payload: Vec<u8>) -> (i32, i64) {
        let mut inner = self.inner.lock();
        let partition = match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % inner.offsets.len() as u64) as usize
            }
            None => 0,
        };
        let offset = inner.offsets[partition];
        inner.offsets[partition] += 1;

        if !inner.closed {
            let record = SourceRecord {
                partition: partition as i32,
                offset,
                key: key.map(<[u8]>::to_vec),
                payload,
            };
            inner
                .subscribers
                .retain(|tx| tx.send(record.clone()).is_ok());
        }

        (partition as i32, offset)
    }

    /// A reader starting at the current tail.
    pub fn subscribe(&self) -> ChannelSource {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.subscribers.push(tx);
        }
        ChannelSource { rx }
    }

    /// End the stream: readers drain what they have, then see `None`.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

/// Reader over a [`MemoryLog`] subscription.
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<SourceRecord>,
}

#[async_trait]
impl TelemetrySource for ChannelSource {
    async fn next_record(&mut self) -> StreamResult<Option<SourceRecord>> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_each_subscriber_sees_every_record() {
        let log = MemoryLog::new(2);
        let mut a = log.subscribe();
        let mut b = log.subscribe();

        log.append(Some(b"dev-1"), b"one".to_vec());
        log.append(Some(b"dev-1"), b"two".to_vec());
        log.close();

        for source in [&mut a, &mut b] {
            let first = source.next_record().await.unwrap().unwrap();
            let second = source.next_record().await.unwrap().unwrap();
            assert_eq!(first.payload, b"one");
            assert_eq!(second.payload, b"two");
            assert_eq!(first.partition, second.partition);
            assert_eq!(second.offset, first.offset + 1);
            assert!(source.next_record().await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_starts_at_tail() {
        let log = MemoryLog::default();
        log.append(None, b"missed".to_vec());
        let mut late = log.subscribe();
        log.append(None, b"seen".to_vec());
        log.close();

        let record = late.next_record().await.unwrap().unwrap();
        assert_eq!(record.payload, b"seen");
        assert_eq!(record.offset, 1);
        assert!(late.next_record().await.unwrap().is_none());
    }

    #[test]
    fn test_offsets_are_per_partition() {
        let log = MemoryLog::new(1);
        assert_eq!(log.append(Some(b"a"), vec![]), (0, 0));
        assert_eq!(log.append(Some(b"b"), vec![]), (0, 1));
        assert_eq!(log.partitions(), 1);
    }

    #[test]
    fn test_dropped_reader_is_forgotten() {
        let log = MemoryLog::default();
        let reader = log.subscribe();
        assert_eq!(log.subscriber_count(), 1);
        drop(reader);
        log.append(None, vec![1]);
        assert_eq!(log.subscriber_count(), 0);
    }
}

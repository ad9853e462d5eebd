//! One direction of flow: a reader paired with a writer.

use tracing::debug;

use super::reader::ReaderAdapter;
use super::writer::WriterAdapter;
use crate::endpoint::{Sink, Source};
use crate::error::Result;

/// Bytes and chunks a link has written so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub chunks: u64,
    pub bytes: u64,
}

#[derive(Debug)]
pub struct RelayLink {
    name: String,
    reader: ReaderAdapter,
    writer: WriterAdapter,
    batch_size: usize,
    stats: LinkStats,
}

impl RelayLink {
    pub fn new(name: impl Into<String>, source: Source, sink: Sink, batch_size: usize) -> Self {
        Self {
            name: name.into(),
            reader: ReaderAdapter::new(Some(source)),
            writer: WriterAdapter::new(Some(sink)),
            batch_size,
            stats: LinkStats::default(),
        }
    }

    /// Copy everything the reader currently yields to the writer, in order.
    ///
    /// Returns `true` once the reader has reached end-of-stream.
    pub fn pump(&mut self) -> Result<bool> {
        for batch in self.reader.next_batches(self.batch_size)? {
            let batch = batch?;
            debug!(link = %self.name, bytes = batch.len(), "TRX");
            self.writer.write(&batch)?;
            self.stats.chunks += 1;
            self.stats.bytes += batch.len() as u64;
        }
        Ok(self.reader.is_eof())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn stats(&self) -> LinkStats {
        self.stats
    }

    pub const fn reader(&self) -> &ReaderAdapter {
        &self.reader
    }

    pub(crate) const fn reader_mut(&mut self) -> &mut ReaderAdapter {
        &mut self.reader
    }

    pub(crate) const fn writer_mut(&mut self) -> &mut WriterAdapter {
        &mut self.writer
    }
}

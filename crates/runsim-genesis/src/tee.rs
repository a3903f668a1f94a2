//! Duplicating body reader.
//!
//! `TeeStream` pulls chunks from the network once and forwards a copy of each
//! to a second consumer over a bounded channel. When that consumer hangs up
//! the stream keeps yielding chunks to its caller, so the remainder of the
//! body is still observed by the digest.
//!
//! `ChannelReader` is the receiving half, exposed as a blocking
//! `std::io::Read` for the JSON tokenizer.

use std::io::{self, Read};

use bytes::{Buf, Bytes};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::trace;

pub(crate) struct TeeStream<S> {
    inner: S,
    tx: Option<mpsc::Sender<Bytes>>,
}

impl<S> TeeStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    pub(crate) fn new(inner: S, tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            inner,
            tx: Some(tx),
        }
    }

    /// Next chunk of the body, after handing a copy to the tokenizer.
    ///
    /// Waits while the tokenizer has not consumed the previous chunk.
    pub(crate) async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        let chunk = match self.inner.next().await? {
            Ok(chunk) => chunk,
            Err(err) => return Some(Err(err)),
        };

        if let Some(tx) = &self.tx {
            if !chunk.is_empty() && tx.send(chunk.clone()).await.is_err() {
                trace!("tokenizer finished, draining remaining body into digest only");
                self.tx = None;
            }
        }

        Some(Ok(chunk))
    }

    /// Signal end of input to the tokenizer.
    pub(crate) fn close(&mut self) {
        self.tx = None;
    }
}

pub(crate) struct ChannelReader {
    rx: mpsc::Receiver<Bytes>,
    current: Bytes,
}

impl ChannelReader {
    pub(crate) fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
        }
    }
}

impl Read for ChannelReader {
    // Must only be called from a blocking context.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(chunk) => self.current = chunk,
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = io::Result<Bytes>> + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn forwards_every_chunk_to_the_reader() {
        let (tx, rx) = mpsc::channel(1);
        let reader = tokio::task::spawn_blocking(move || {
            let mut out = String::new();
            ChannelReader::new(rx).read_to_string(&mut out).unwrap();
            out
        });

        let mut tee = TeeStream::new(chunks(&["ab", "", "cd", "ef"]), tx);
        let mut seen = Vec::new();
        while let Some(chunk) = tee.next_chunk().await {
            seen.extend_from_slice(&chunk.unwrap());
        }
        tee.close();

        assert_eq!(seen, b"abcdef");
        assert_eq!(reader.await.unwrap(), "abcdef");
    }

    #[tokio::test]
    async fn keeps_yielding_after_the_reader_hangs_up() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let mut tee = TeeStream::new(chunks(&["one", "two", "three"]), tx);
        let mut count = 0;
        while let Some(chunk) = tee.next_chunk().await {
            chunk.unwrap();
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn read_errors_are_returned_to_the_caller() {
        let (tx, _rx) = mpsc::channel(4);
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"{")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);

        let mut tee = TeeStream::new(body, tx);
        assert!(tee.next_chunk().await.unwrap().is_ok());
        let err = tee.next_chunk().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}

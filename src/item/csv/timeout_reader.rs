use std::{
    io::{self, Read},
    thread,
    time::Duration,
};

use log::debug;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::{BatchError, core::blocking};

const BUFFER_SIZE: usize = 8 * 1024;

// Chunks read ahead of the consumer
const CHANNEL_CAPACITY: usize = 4;

/// A byte source read on a background thread, each read bounded by a timeout.
///
/// Pipes, sockets or standard input can stall forever. The source is moved
/// to a dedicated thread on the first read and its bytes are handed over
/// through a channel; a read waiting longer than the timeout fails with
/// [`io::ErrorKind::TimedOut`], which the CSV reader reports as
/// [`BatchError::Timeout`].
///
/// Waiting goes through `tokio::task::block_in_place`, so reads must happen
/// on a multi-threaded tokio runtime.
pub struct TimeoutReader {
    source: Option<Box<dyn Read + Send>>,
    receiver: Option<Receiver<io::Result<Vec<u8>>>>,
    pending: Vec<u8>,
    position: usize,
    timeout: Duration,
}

impl TimeoutReader {
    pub fn new<R: Read + Send + 'static>(source: R, timeout: Duration) -> Self {
        Self {
            source: Some(Box::new(source)),
            receiver: None,
            pending: Vec::new(),
            position: 0,
            timeout,
        }
    }

    fn start(&mut self, source: Box<dyn Read + Send>) -> io::Result<()> {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        thread::Builder::new()
            .name("csv-source".to_string())
            .spawn(move || pump(source, sender))?;
        self.receiver = Some(receiver);
        debug!("CSV source reader thread started");
        Ok(())
    }

    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        if let Some(source) = self.source.take() {
            self.start(source)?;
        }

        let timeout = self.timeout;
        let Some(receiver) = self.receiver.as_mut() else {
            return Ok(None);
        };

        let received = blocking::block_on("CSV reader", "read", timeout, async {
            Ok(receiver.recv().await)
        });

        match received {
            Ok(Some(chunk)) => chunk.map(Some),
            Ok(None) => {
                self.receiver = None;
                Ok(None)
            }
            Err(BatchError::Timeout(message)) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, message))
            }
            Err(error) => Err(io::Error::other(error.to_string())),
        }
    }
}

impl Read for TimeoutReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position == self.pending.len() {
            match self.next_chunk()? {
                Some(chunk) => {
                    self.pending = chunk;
                    self.position = 0;
                }
                None => return Ok(0),
            }
        }

        let count = buf.len().min(self.pending.len() - self.position);
        buf[..count].copy_from_slice(&self.pending[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }
}

/// Copies the source into the channel until end of data, an error, or the
/// reader side being dropped.
fn pump(mut source: Box<dyn Read + Send>, sender: Sender<io::Result<Vec<u8>>>) {
    let mut buffer = vec![0; BUFFER_SIZE];
    loop {
        let message = match source.read(&mut buffer) {
            Ok(0) => return,
            Ok(count) => Ok(buffer[..count].to_vec()),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => Err(error),
        };
        let failed = message.is_err();
        if sender.blocking_send(message).is_err() || failed {
            return;
        }
    }
}

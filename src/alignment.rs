//! Alignment helpers and the aligned writer
//!
//! Flash can only be programmed in whole alignment units. [`AlignedWriter`]
//! adapts a sequence of arbitrarily sized writes to that rule:
//!
//! ```text
//!   write(header) write(key) write(value)
//!        │            │           │
//!        ▼            ▼           ▼
//!   ┌──────────────────────────────────┐
//!   │ buffer (multiple of alignment)   │──full──► Output::write(chunk)
//!   └──────────────────────────────────┘
//!        │ flush / drop
//!        ▼
//!   remaining bytes + zero padding ──────────► Output::write(tail)
//! ```
//!
//! Every call reaching the output is a whole number of alignment units.

use tracing::warn;

use crate::error::{KvError, Result};
use crate::flash::{FlashPartition, FlashResult};

/// Round `value` down to a multiple of `alignment`
pub const fn align_down(value: usize, alignment: usize) -> usize {
    (value / alignment) * alignment
}

/// Round `value` up to a multiple of `alignment`
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) / alignment * alignment
}

/// Bytes needed to pad `length` to a multiple of `alignment`
pub const fn padding(length: usize, alignment: usize) -> usize {
    align_up(length, alignment) - length
}

// =============================================================================
// Output
// =============================================================================

/// Destination for aligned chunks
pub trait Output {
    /// Consume `data`, returning the number of bytes taken
    fn write(&mut self, data: &[u8]) -> FlashResult<usize>;
}

impl Output for Vec<u8> {
    fn write(&mut self, data: &[u8]) -> FlashResult<usize> {
        self.extend_from_slice(data);
        Ok(data.len())
    }
}

impl<O: Output + ?Sized> Output for &mut O {
    fn write(&mut self, data: &[u8]) -> FlashResult<usize> {
        (**self).write(data)
    }
}

/// Programs consecutive partition addresses starting at `address`
pub struct FlashOutput<'a, F: FlashPartition + ?Sized> {
    partition: &'a mut F,
    address: usize,
}

impl<'a, F: FlashPartition + ?Sized> FlashOutput<'a, F> {
    pub fn new(partition: &'a mut F, address: usize) -> Self {
        Self { partition, address }
    }
}

impl<F: FlashPartition + ?Sized> Output for FlashOutput<'_, F> {
    fn write(&mut self, data: &[u8]) -> FlashResult<usize> {
        self.partition.write(self.address, data)?;
        self.address += data.len();
        Ok(data.len())
    }
}

// =============================================================================
// Aligned Writer
// =============================================================================

/// Buffers writes into alignment-sized chunks.
///
/// Pending bytes are zero-padded and written by [`flush`](Self::flush), or on
/// drop if the writer goes out of scope first (for example on an early `?`
/// return). A failed output write poisons the writer: later writes return an
/// error and drop does not retry.
pub struct AlignedWriter<'b, O: Output> {
    buffer: &'b mut [u8],
    write_size: usize,
    alignment: usize,
    output: O,
    bytes_written: usize,
    bytes_in_buffer: usize,
    failed: bool,
}

impl<'b, O: Output> AlignedWriter<'b, O> {
    /// `buffer` must hold at least one alignment unit; only the largest
    /// aligned prefix of it is used.
    pub fn new(buffer: &'b mut [u8], alignment: usize, output: O) -> Result<Self> {
        if alignment == 0 || buffer.len() < alignment {
            return Err(KvError::InvalidArgument(format!(
                "aligned writer needs a buffer of at least {} bytes, got {}",
                alignment,
                buffer.len()
            )));
        }

        let write_size = align_down(buffer.len(), alignment);
        Ok(Self {
            buffer,
            write_size,
            alignment,
            output,
            bytes_written: 0,
            bytes_in_buffer: 0,
            failed: false,
        })
    }

    /// Append bytes; full chunks are forwarded to the output immediately
    pub fn write(&mut self, mut data: &[u8]) -> Result<()> {
        if self.failed {
            return Err(KvError::FailedPrecondition(
                "aligned writer aborted by an earlier output failure".to_string(),
            ));
        }

        while !data.is_empty() {
            let take = data.len().min(self.write_size - self.bytes_in_buffer);
            self.buffer[self.bytes_in_buffer..self.bytes_in_buffer + take]
                .copy_from_slice(&data[..take]);
            self.bytes_in_buffer += take;
            data = &data[take..];

            if self.bytes_in_buffer == self.write_size {
                self.emit(self.write_size)?;
            }
        }
        Ok(())
    }

    /// Pad and write any buffered bytes; returns the total bytes written to
    /// the output since the previous flush.
    pub fn flush(&mut self) -> Result<usize> {
        if self.failed {
            return Err(KvError::FailedPrecondition(
                "aligned writer aborted by an earlier output failure".to_string(),
            ));
        }

        if self.bytes_in_buffer > 0 {
            let pad = padding(self.bytes_in_buffer, self.alignment);
            self.buffer[self.bytes_in_buffer..self.bytes_in_buffer + pad].fill(0);
            self.emit(self.bytes_in_buffer + pad)?;
        }

        Ok(std::mem::take(&mut self.bytes_written))
    }

    fn emit(&mut self, len: usize) -> Result<()> {
        match self.output.write(&self.buffer[..len]) {
            Ok(written) => {
                self.bytes_written += written;
                self.bytes_in_buffer = 0;
                Ok(())
            }
            Err(e) => {
                self.failed = true;
                self.bytes_in_buffer = 0;
                Err(e.into())
            }
        }
    }
}

impl<O: Output> Drop for AlignedWriter<'_, O> {
    fn drop(&mut self) {
        if self.failed || self.bytes_in_buffer == 0 {
            return;
        }
        if let Err(e) = self.flush() {
            warn!(error = %e, "aligned writer flush on drop failed");
        }
    }
}

/// Write all `spans` through an [`AlignedWriter`] and flush
pub fn aligned_write<O: Output>(
    output: O,
    alignment: usize,
    buffer: &mut [u8],
    spans: &[&[u8]],
) -> Result<usize> {
    let mut writer = AlignedWriter::new(buffer, alignment, output)?;
    for span in spans {
        writer.write(span)?;
    }
    writer.flush()
}

//! Tests for the Aligned Writer
//!
//! These tests verify:
//! - Output chunks are always multiples of the alignment
//! - Pending bytes are zero-padded on flush and on drop
//! - Totals reported by flush match what reached the output
//! - A failing output poisons the writer
//! - Programming real flash through FlashOutput

use sectorkv::alignment::{aligned_write, AlignedWriter, FlashOutput, Output};
use sectorkv::flash::{FlashError, FlashPartition, FlashResult, MemoryFlash};
use sectorkv::KvError;

// =============================================================================
// Helper Functions
// =============================================================================

/// Records every chunk it receives
#[derive(Default)]
struct ChunkRecorder {
    chunks: Vec<Vec<u8>>,
}

impl ChunkRecorder {
    fn concat(&self) -> Vec<u8> {
        self.chunks.concat()
    }
}

impl Output for ChunkRecorder {
    fn write(&mut self, data: &[u8]) -> FlashResult<usize> {
        self.chunks.push(data.to_vec());
        Ok(data.len())
    }
}

/// Accepts `remaining` chunks, then fails
struct FailingOutput {
    remaining: usize,
    accepted: usize,
}

impl Output for FailingOutput {
    fn write(&mut self, data: &[u8]) -> FlashResult<usize> {
        if self.remaining == 0 {
            return Err(FlashError::Injected("write"));
        }
        self.remaining -= 1;
        self.accepted += data.len();
        Ok(data.len())
    }
}

// =============================================================================
// Chunking Tests
// =============================================================================

#[test]
fn test_chunks_are_aligned() {
    let mut recorder = ChunkRecorder::default();
    let mut buffer = [0u8; 48];
    {
        let mut writer = AlignedWriter::new(&mut buffer, 16, &mut recorder).unwrap();
        writer.write(&[1u8; 7]).unwrap();
        writer.write(&[2u8; 60]).unwrap();
        writer.write(&[3u8; 3]).unwrap();
        assert_eq!(writer.flush().unwrap(), 80);
    }

    for chunk in &recorder.chunks {
        assert_eq!(chunk.len() % 16, 0);
        assert!(chunk.len() <= 48);
    }

    let data = recorder.concat();
    assert_eq!(data.len(), 80);
    assert_eq!(&data[..7], &[1u8; 7]);
    assert_eq!(&data[7..67], &[2u8; 60][..]);
    assert_eq!(&data[67..70], &[3u8; 3]);
    assert!(data[70..].iter().all(|&b| b == 0));
}

#[test]
fn test_buffer_not_multiple_of_alignment_uses_aligned_prefix() {
    let mut recorder = ChunkRecorder::default();
    let mut buffer = [0u8; 40];
    {
        let mut writer = AlignedWriter::new(&mut buffer, 16, &mut recorder).unwrap();
        writer.write(&[9u8; 64]).unwrap();
        writer.flush().unwrap();
    }

    assert!(recorder.chunks.iter().all(|c| c.len() == 32));
    assert_eq!(recorder.concat().len(), 64);
}

#[test]
fn test_flush_with_nothing_pending() {
    let mut out = Vec::new();
    let mut buffer = [0u8; 16];
    let mut writer = AlignedWriter::new(&mut buffer, 16, &mut out).unwrap();
    assert_eq!(writer.flush().unwrap(), 0);
    drop(writer);
    assert!(out.is_empty());
}

#[test]
fn test_drop_flushes_pending_bytes() {
    let mut out = Vec::new();
    let mut buffer = [0u8; 32];
    {
        let mut writer = AlignedWriter::new(&mut buffer, 16, &mut out).unwrap();
        writer.write(b"abc").unwrap();
    }

    assert_eq!(out.len(), 16);
    assert_eq!(&out[..3], b"abc");
    assert!(out[3..].iter().all(|&b| b == 0));
}

#[test]
fn test_aligned_write_spans() {
    let mut out = Vec::new();
    let mut buffer = [0u8; 64];
    let spans: [&[u8]; 3] = [b"header", b"", b"body"];
    let written = aligned_write(&mut out, 16, &mut buffer, &spans).unwrap();

    assert_eq!(written, 16);
    assert_eq!(&out[..10], b"headerbody");
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_failed_output_poisons_writer() {
    let mut output = FailingOutput {
        remaining: 1,
        accepted: 0,
    };
    let mut buffer = [0u8; 16];
    {
        let mut writer = AlignedWriter::new(&mut buffer, 16, &mut output).unwrap();
        writer.write(&[0u8; 16]).unwrap();

        let result = writer.write(&[0u8; 16]);
        assert!(matches!(result, Err(KvError::Io(FlashError::Injected(_)))));

        assert!(matches!(
            writer.write(b"x"),
            Err(KvError::FailedPrecondition(_))
        ));
        assert!(matches!(writer.flush(), Err(KvError::FailedPrecondition(_))));
    }

    assert_eq!(output.accepted, 16);
}

// =============================================================================
// Flash Output Tests
// =============================================================================

#[test]
fn test_flash_output_programs_consecutive_addresses() {
    let mut flash = MemoryFlash::new(256, 2, 16);
    let mut buffer = [0u8; 32];
    {
        let output = FlashOutput::new(&mut flash, 256);
        aligned_write(output, 16, &mut buffer, &[&[7u8; 40][..]]).unwrap();
    }

    let mut read = [0u8; 48];
    flash.read(256, &mut read).unwrap();
    assert_eq!(&read[..40], &[7u8; 40][..]);
    assert!(read[40..].iter().all(|&b| b == 0));
    assert!(flash.bytes()[..256].iter().all(|&b| b == 0xFF));
}

#[test]
fn test_flash_output_rejects_programmed_bytes() {
    let mut flash = MemoryFlash::new(256, 2, 16);
    let mut buffer = [0u8; 16];
    aligned_write(FlashOutput::new(&mut flash, 0), 16, &mut buffer, &[&b"first"[..]]).unwrap();

    let output = FlashOutput::new(&mut flash, 0);
    let result = aligned_write(output, 16, &mut buffer, &[&b"again"[..]]);
    assert!(matches!(result, Err(KvError::Io(FlashError::NotErased { .. }))));
}

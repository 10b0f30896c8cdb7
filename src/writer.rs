//! Optional raw-data sink: successive buffers appended to one flat binary
//! file, little-endian 16-bit words in board order.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;

use crate::error::DaqError;
use crate::ring::RawBuffer;

pub struct RawDump {
    out: BufWriter<File>,
    scratch: Vec<u8>,
    pub buffers_written: usize,
    pub bytes_written: usize,
}

impl RawDump {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, DaqError> {
        let file = File::create(path.as_ref())?;
        info!("raw dump sink: {}", path.as_ref().display());
        Ok(Self {
            out: BufWriter::new(file),
            scratch: Vec::new(),
            buffers_written: 0,
            bytes_written: 0,
        })
    }

    /// Append one buffer. Word order is exactly the interleaved board order.
    pub fn append(&mut self, buffer: &RawBuffer) -> Result<(), DaqError> {
        self.scratch.clear();
        self.scratch.reserve(buffer.byte_len());
        for &word in buffer.as_slice() {
            self.scratch.extend_from_slice(&word.to_le_bytes());
        }
        self.out.write_all(&self.scratch)?;
        self.buffers_written += 1;
        self.bytes_written += self.scratch.len();
        Ok(())
    }

    /// Flush and close the sink.
    pub fn finish(mut self) -> Result<(), DaqError> {
        self.out.flush()?;
        info!(
            "raw dump closed: {} buffers, {} bytes",
            self.buffers_written, self.bytes_written
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dumps_little_endian_words_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.bin");

        let mut buffer = RawBuffer::new(0, 4);
        buffer
            .as_mut_slice()
            .copy_from_slice(&[0x0010, 0x8000, 0xFFF0, 0x0001]);

        let mut dump = RawDump::create(&path).unwrap();
        dump.append(&buffer).unwrap();
        dump.append(&buffer).unwrap();
        assert_eq!(dump.buffers_written, 2);
        assert_eq!(dump.bytes_written, 16);
        dump.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..2], &[0x10, 0x00]);
        assert_eq!(&bytes[2..4], &[0x00, 0x80]);
        assert_eq!(&bytes[4..6], &[0xF0, 0xFF]);
    }
}

//! Sample sinks: WAV and AU encoders, raw stream output.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum OutputError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("wav output: {0}")]
    Wav(#[from] hound::Error),
    #[error("audio device: {0}")]
    Device(String),
}

/// Accepts interleaved i16 frames. `write` returns the number of frames
/// accepted; short writes are retried by `write_all`, and zero progress
/// is an error.
pub trait SampleSink {
    fn write(&mut self, frames: &[i16]) -> Result<usize, OutputError>;

    /// Flush and close. Called once after the last write.
    fn finish(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

/// Drive a sink until `buf` is fully accepted.
pub fn write_all(
    sink: &mut dyn SampleSink,
    mut buf: &[i16],
    channels: usize,
) -> Result<(), OutputError> {
    while !buf.is_empty() {
        let n = sink.write(buf)?;
        if n == 0 {
            return Err(OutputError::Device("sink made no progress".into()));
        }
        buf = &buf[(n * channels).min(buf.len())..];
    }
    Ok(())
}

/// 16-bit PCM WAV file writer.
pub struct WavSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    channels: usize,
}

impl WavSink {
    pub fn create(path: &Path, srate: u32, channels: usize) -> Result<Self, OutputError> {
        let spec = hound::WavSpec {
            channels: channels as u16,
            sample_rate: srate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)?;
        Ok(WavSink {
            writer: Some(writer),
            channels,
        })
    }
}

impl SampleSink for WavSink {
    fn write(&mut self, frames: &[i16]) -> Result<usize, OutputError> {
        let writer = self.writer.as_mut().expect("write after finish");
        for &s in frames {
            writer.write_sample(s)?;
        }
        Ok(frames.len() / self.channels)
    }

    fn finish(&mut self) -> Result<(), OutputError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

/// AU (Sun audio) stream writer: a fixed header, then big-endian 16-bit
/// PCM. The data size field is left unknown so the stream can be piped.
pub struct AuSink<W: Write> {
    out: W,
    channels: usize,
    header_written: bool,
    srate: u32,
}

impl<W: Write> AuSink<W> {
    pub fn new(out: W, srate: u32, channels: usize) -> Self {
        AuSink {
            out,
            channels,
            header_written: false,
            srate,
        }
    }

    fn write_header(&mut self) -> io::Result<()> {
        // magic, data offset, data size (unknown), encoding (16-bit
        // linear PCM), sample rate, channels.
        self.out.write_all(&0x2e736e64u32.to_be_bytes())?;
        self.out.write_all(&24u32.to_be_bytes())?;
        self.out.write_all(&0xffffffffu32.to_be_bytes())?;
        self.out.write_all(&3u32.to_be_bytes())?;
        self.out.write_all(&self.srate.to_be_bytes())?;
        self.out.write_all(&(self.channels as u32).to_be_bytes())?;
        Ok(())
    }
}

impl<W: Write> SampleSink for AuSink<W> {
    fn write(&mut self, frames: &[i16]) -> Result<usize, OutputError> {
        if !self.header_written {
            self.write_header()?;
            self.header_written = true;
        }
        let mut bytes = Vec::with_capacity(frames.len() * 2);
        for &s in frames {
            bytes.extend_from_slice(&s.to_be_bytes());
        }
        self.out.write_all(&bytes)?;
        Ok(frames.len() / self.channels)
    }

    fn finish(&mut self) -> Result<(), OutputError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Raw native-endian interleaved i16 stream writer.
pub struct RawSink<W: Write> {
    out: W,
    channels: usize,
}

impl<W: Write> RawSink<W> {
    pub fn new(out: W, channels: usize) -> Self {
        RawSink { out, channels }
    }
}

impl<W: Write> SampleSink for RawSink<W> {
    fn write(&mut self, frames: &[i16]) -> Result<usize, OutputError> {
        let mut bytes = Vec::with_capacity(frames.len() * 2);
        for &s in frames {
            bytes.extend_from_slice(&s.to_ne_bytes());
        }
        self.out.write_all(&bytes)?;
        Ok(frames.len() / self.channels)
    }

    fn finish(&mut self) -> Result<(), OutputError> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn au_header_and_frames() {
        let mut buf = Vec::new();
        {
            let mut sink = AuSink::new(&mut buf, 48000, 2);
            assert_eq!(sink.write(&[1, -1, 2, -2]).unwrap(), 2);
            sink.finish().unwrap();
        }
        assert_eq!(&buf[0..4], b".snd");
        assert_eq!(buf.len(), 24 + 8);
        // Big-endian samples follow the header.
        assert_eq!(&buf[24..26], &1i16.to_be_bytes());
    }

    #[test]
    fn write_all_retries() {
        struct Half(Vec<i16>);
        impl SampleSink for Half {
            fn write(&mut self, frames: &[i16]) -> Result<usize, OutputError> {
                let take = (frames.len() / 2).min(2);
                self.0.extend_from_slice(&frames[..take * 2]);
                Ok(take)
            }
        }
        let mut sink = Half(Vec::new());
        write_all(&mut sink, &[1, 2, 3, 4, 5, 6, 7, 8], 2).unwrap();
        assert_eq!(sink.0, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }
}

//! Scriptable audio synthesis language and renderer.
//!
//! Scripts describe oscillators, noise sources and their modulation
//! networks in a terse line-oriented language. They compile into a
//! program of timed events which a block renderer plays to 16-bit PCM:
//! an audio device, a WAV or AU file, or a raw stream.
//!
//! Pipeline: bytes -> tokens ([`scanner`]) -> script events ([`lang`])
//! -> compiled program ([`program`]) -> sample blocks ([`render`]) ->
//! interleaved i16 frames ([`output`]).

pub mod lang;
pub mod line;
pub mod math;
pub mod noise;
pub mod osc;
pub mod output;
pub mod program;
pub mod render;
pub mod scanner;
pub mod symtab;
pub mod textbuf;
pub mod wave;

#[cfg(feature = "device")]
pub mod device;

/// Default sample rate in Hz.
pub const DEFAULT_SRATE: u32 = 96000;

//! # `ch2g4`
//!
//! Channel attenuation models for a 2.4 GHz wireless simulator. At every
//! simulated instant the host asks: what is the path loss, in dB, between
//! transmitter and receiver right now? Two models answer:
//!
//! - [`MatrixChannel`](MatrixChannel) keeps one attenuation per ordered
//!   device pair, each either constant or replayed from a time-stamped
//!   trace file.
//!
//! - [`PositionalChannel`](PositionalChannel) moves devices through 3-D
//!   space according to a stream of movement events and derives the path
//!   loss from the pair's momentary distance with a log-distance law.
//!
//! Both consume their input files lazily and strictly forward, so the host
//! must query with monotonically non-decreasing simulated times. All input
//! is line-oriented text with `#` comments and blank lines allowed anywhere.
//!
//! Usage is simple:
//! ```
//! use ch2g4::{PositionalChannel, PositionalOptions, ISI_SNR_DB};
//!
//! // or a file or FIFO via PositionalChannel::new
//! let stream: &[u8] = b"0 set 0  0 0 0\n\
//!                       0 set 1  10 0 0\n";
//! let mut channel =
//!     PositionalChannel::from_reader(&PositionalOptions::default(), 2, stream, "example")?;
//!
//! let mut att = [0.0; 2];
//! let isi_snr = channel.calc(&[false, true], 0, 0, &mut att)?;
//! assert_eq!(isi_snr, ISI_SNR_DB);
//! assert!((att[1] - 59.604).abs() < 1e-3); // 10 m of free space at 2.4 GHz
//! # Ok::<(), ch2g4::ChannelError>(())
//! ```
#[deny(rustdoc::broken_intra_doc_links)]
mod matrix;
mod positional;
mod record;
mod trace;

pub use matrix::{MatrixChannel, MatrixOptions};
pub use positional::{PositionalChannel, PositionalOptions};

use std::io;
use std::path::{Path, PathBuf};

/// Simulated time in integer microseconds. The host only ever moves it
/// forward.
pub type SimTime = u64;

/// The inter-symbol-interference SNR ceiling reported by every `calc`.
/// Reserved, not functional: neither model estimates multipath ISI.
pub const ISI_SNR_DB: f64 = 100.0;

/// Attenuation reported for a path whose endpoint is disabled; high enough
/// to mute any transmission.
pub const DISABLED_ATT_DB: f64 = 1000.0;

/// A configuration value outside its allowed range.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("attenuation can only be between -100 and 100 dB ({0})")]
    AttenuationRange(f64),

    #[error("extra attenuation can only be between -100 and 100 dB ({0})")]
    ExtraAttenuationRange(f64),

    #[error("distance exponent can only be between 1 and 4 ({0})")]
    DistanceExpRange(f64),
}

/// Why a record was beyond repair. Carried inside
/// [`ChannelError::Corrupt`](ChannelError::Corrupt) next to the offending
/// file and line.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CorruptKind {
    /// An attenuation trace file without a single sample.
    #[error("attenuation trace is empty")]
    EmptyTraceFile,

    /// A trace record that is not `<time> <attenuation>`.
    #[error("expected `<time> <attenuation>`")]
    BadTraceRecord,

    /// A matrix record that is not `<tx> <rx> <attenuation>` or
    /// `<tx> <rx> "<trace file>"`.
    #[error("expected `<tx> <rx> <attenuation>` or `<tx> <rx> \"<trace file>\"`")]
    BadMatrixRecord,

    /// A position stream record that does not match any event shape.
    #[error("expected `<time> enable|disable|set|move <device> ...`")]
    BadEvent,

    /// A position stream record with an unrecognised command word.
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    /// A position stream event at or before the time horizon that has
    /// already been parsed.
    #[error("event at time {time} is not after already-parsed time {parsed}")]
    OutOfOrderEvent { time: SimTime, parsed: SimTime },

    /// A `move` for a device whose position was never set.
    #[error("cannot move device {0} before its position is set")]
    MoveWithoutPosition(usize),
}

impl CorruptKind {
    /// Attach the offending file and (normalised) line content.
    pub(crate) fn at(self, path: &Path, line: &str) -> ChannelError {
        ChannelError::Corrupt {
            path: path.to_owned(),
            line: line.to_owned(),
            kind: self,
        }
    }
}

/// Set of errors that can occur while building or querying a channel.
///
/// All of these are fatal. Recoverable conditions (out-of-range device
/// indices, path redefinitions, truncated records, near-field distances)
/// are reported through the [`log`](log) facade and worked around instead.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{path}: corrupt record {line:?}: {kind}")]
    Corrupt {
        path: PathBuf,
        line: String,
        kind: CorruptKind,
    },
}

/// A channel model owned by the host: built once, queried with
/// non-decreasing simulated times, dropped when the simulation ends
/// (dropping closes every input file).
pub enum Channel {
    Matrix(MatrixChannel),
    Positional(PositionalChannel),
}

impl Channel {
    /// Build a matrix-model channel for `n_devices` devices.
    pub fn matrix(options: &MatrixOptions, n_devices: usize) -> Result<Channel, ChannelError> {
        Ok(Channel::Matrix(MatrixChannel::new(options, n_devices)?))
    }

    /// Build a positional-model channel for `n_devices` devices.
    pub fn positional(
        options: &PositionalOptions,
        n_devices: usize,
    ) -> Result<Channel, ChannelError> {
        Ok(Channel::Positional(PositionalChannel::new(
            options, n_devices,
        )?))
    }

    pub fn n_devices(&self) -> usize {
        match self {
            Channel::Matrix(channel) => channel.n_devices(),
            Channel::Positional(channel) => channel.n_devices(),
        }
    }

    /// Recalculate the path loss towards receiver `rx_nbr` at time `now`.
    ///
    /// For every device `i` with `tx_used[i]` set, `att[i]` is overwritten
    /// with the attenuation of the path `i -> rx_nbr` in dB; entries of
    /// unused transmitters are left untouched. The positional model first
    /// applies every pending movement event up to `now`. Returns the
    /// ISI-SNR ceiling, which is always [`ISI_SNR_DB`](ISI_SNR_DB).
    ///
    /// # Panics
    ///
    /// Panics if `tx_used` or `att` are not exactly `n_devices` long, if
    /// `rx_nbr` is out of range, or (matrix model) if `tx_used[rx_nbr]` is
    /// set: a device does not transmit to itself.
    pub fn calc(
        &mut self,
        tx_used: &[bool],
        rx_nbr: usize,
        now: SimTime,
        att: &mut [f64],
    ) -> Result<f64, ChannelError> {
        match self {
            Channel::Matrix(channel) => channel.calc(tx_used, rx_nbr, now, att),
            Channel::Positional(channel) => channel.calc(tx_used, rx_nbr, now, att),
        }
    }
}

impl From<MatrixChannel> for Channel {
    fn from(channel: MatrixChannel) -> Channel {
        Channel::Matrix(channel)
    }
}

impl From<PositionalChannel> for Channel {
    fn from(channel: PositionalChannel) -> Channel {
        Channel::Positional(channel)
    }
}

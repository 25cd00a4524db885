//! The matrix channel model: one independent attenuation per ordered pair.
//!
//! Every `tx -> rx` path is either a constant number of dB or follows its
//! own attenuation trace file. Paths the matrix file does not mention (and
//! all paths, when no file is given) fall back to the default attenuation.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::warn;

use crate::record::RecordReader;
use crate::trace::{AttTrace, PathGain};
use crate::{ChannelError, ConfigError, CorruptKind, SimTime, ISI_SNR_DB};

/// [`MatrixChannel`](MatrixChannel) configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatrixOptions {
    /// Default attenuation in dB for paths the matrix file does not define.
    pub att: f64,

    /// Extra attenuation in dB added to every reported value.
    pub atxtra: f64,

    /// The attenuation matrix file. With `None` every path uses
    /// [`att`](Self::att).
    pub matrix_file: Option<PathBuf>,
}

impl Default for MatrixOptions {
    fn default() -> Self {
        MatrixOptions {
            att: 60.0,
            atxtra: 0.0,
            matrix_file: None,
        }
    }
}

impl MatrixOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.att < -100.0 || self.att > 100.0 {
            return Err(ConfigError::AttenuationRange(self.att));
        }
        if self.atxtra < -100.0 || self.atxtra > 100.0 {
            return Err(ConfigError::ExtraAttenuationRange(self.atxtra));
        }
        Ok(())
    }
}

/// Channel model with an `N x N` table of per-path attenuations.
pub struct MatrixChannel {
    n_devices: usize,
    atxtra: f64,
    /// Flat table indexed `rx * n_devices + tx`.
    paths: Vec<PathGain<File>>,
}

impl MatrixChannel {
    /// Validate `options`, load the matrix file if one is configured and
    /// open every trace file it references.
    pub fn new(options: &MatrixOptions, n_devices: usize) -> Result<MatrixChannel, ChannelError> {
        options.validate()?;
        match &options.matrix_file {
            None => Self::build::<File>(options, n_devices, None),
            Some(path) => {
                let file = File::open(path).map_err(|source| ChannelError::Open {
                    path: path.clone(),
                    source,
                })?;
                Self::build(options, n_devices, Some(RecordReader::new(file, path)))
            }
        }
    }

    /// Like [`new`](Self::new), but with the matrix definition coming from
    /// an arbitrary reader. `label` stands in for the file name in
    /// diagnostics. Trace files named by the matrix are still opened from
    /// the file system.
    pub fn from_reader<R: Read>(
        options: &MatrixOptions,
        n_devices: usize,
        reader: R,
        label: impl Into<PathBuf>,
    ) -> Result<MatrixChannel, ChannelError> {
        options.validate()?;
        Self::build(options, n_devices, Some(RecordReader::new(reader, label)))
    }

    fn build<R: Read>(
        options: &MatrixOptions,
        n_devices: usize,
        reader: Option<RecordReader<R>>,
    ) -> Result<MatrixChannel, ChannelError> {
        let n = n_devices;
        let had_file = reader.is_some();
        let mut paths: Vec<PathGain<File>> = (0..n * n).map(|_| PathGain::Unset).collect();

        if let Some(mut reader) = reader {
            while let Some(line) = reader.read_record()? {
                let record = parse_matrix_record(&line, reader.path())?;
                if record.tx >= n || record.rx >= n {
                    warn!(
                        "{}: path {}->{} is out of range, only {} devices are simulated; ignored",
                        reader.path().display(),
                        record.tx,
                        record.rx,
                        n
                    );
                    continue;
                }
                let index = record.rx * n + record.tx;
                if !matches!(paths[index], PathGain::Unset) {
                    warn!(
                        "{}: redefinition of the path {}->{} attenuation",
                        reader.path().display(),
                        record.tx,
                        record.rx
                    );
                }
                // Replacing the slot drops any previously opened trace file.
                paths[index] = match record.value {
                    MatrixValue::Constant(att) => PathGain::Constant(att + options.atxtra),
                    MatrixValue::TraceFile(name) => {
                        AttTrace::open(Path::new(&name), options.atxtra)?
                    }
                };
            }
        }

        // Everything the file left untouched falls back to the default.
        for tx in 0..n {
            for rx in 0..n {
                if tx == rx {
                    continue;
                }
                let index = rx * n + tx;
                if matches!(paths[index], PathGain::Unset) {
                    if had_file {
                        warn!(
                            "path {}->{} is not in the matrix file; set to {} + {} dB",
                            tx, rx, options.att, options.atxtra
                        );
                    }
                    paths[index] = PathGain::Constant(options.att + options.atxtra);
                }
            }
        }

        Ok(MatrixChannel {
            n_devices,
            atxtra: options.atxtra,
            paths,
        })
    }

    pub fn n_devices(&self) -> usize {
        self.n_devices
    }

    /// Attenuation of the `tx -> rx` path at time `now`, in dB.
    ///
    /// # Panics
    ///
    /// Panics if `tx == rx`: self-pairs have no attenuation.
    pub fn attenuation(
        &mut self,
        tx: usize,
        rx: usize,
        now: SimTime,
    ) -> Result<f64, ChannelError> {
        let index = rx * self.n_devices + tx;
        self.paths[index].attenuation(now, self.atxtra)
    }

    /// Write into `att[i]`, for every `i` with `tx_used[i]`, the attenuation
    /// of the path `i -> rx_nbr` at time `now`. Other entries of `att` are
    /// left untouched. Returns the ISI-SNR ceiling (always
    /// [`ISI_SNR_DB`](ISI_SNR_DB)).
    ///
    /// # Panics
    ///
    /// Panics if `tx_used` or `att` are not exactly `n_devices` long, if
    /// `rx_nbr` is out of range, or if `tx_used[rx_nbr]` is set (a device
    /// does not transmit to itself).
    pub fn calc(
        &mut self,
        tx_used: &[bool],
        rx_nbr: usize,
        now: SimTime,
        att: &mut [f64],
    ) -> Result<f64, ChannelError> {
        assert_eq!(tx_used.len(), self.n_devices);
        assert_eq!(att.len(), self.n_devices);
        assert!(rx_nbr < self.n_devices);

        for tx in 0..self.n_devices {
            if tx_used[tx] {
                att[tx] = self.attenuation(tx, rx_nbr, now)?;
            }
        }
        Ok(ISI_SNR_DB)
    }
}

enum MatrixValue {
    Constant(f64),
    TraceFile(String),
}

struct MatrixRecord {
    tx: usize,
    rx: usize,
    value: MatrixValue,
}

/// Split the leading whitespace-delimited token off `s`.
fn next_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(at) => (&s[..at], &s[at..]),
        None => (s, ""),
    }
}

/// Parse `tx rx att` or `tx rx "filename"`. The value is a quoted file name
/// when the first `"`-or-digit character right of `rx` is a `"`, a decibel
/// number otherwise.
fn parse_matrix_record(line: &str, path: &Path) -> Result<MatrixRecord, ChannelError> {
    let corrupt = || CorruptKind::BadMatrixRecord.at(path, line);

    let (token, rest) = next_token(line);
    let tx = token.parse::<usize>().map_err(|_| corrupt())?;
    let (token, rest) = next_token(rest);
    let rx = token.parse::<usize>().map_err(|_| corrupt())?;

    let at = rest
        .find(|c: char| c == '"' || c.is_ascii_digit())
        .ok_or_else(corrupt)?;
    let value = &rest[at..];

    let value = if let Some(quoted) = value.strip_prefix('"') {
        let name = quoted.split('"').next().unwrap_or("");
        if name.is_empty() {
            return Err(corrupt());
        }
        MatrixValue::TraceFile(name.to_owned())
    } else {
        let (number, _) = next_token(value);
        MatrixValue::Constant(number.parse::<f64>().map_err(|_| corrupt())?)
    };

    Ok(MatrixRecord { tx, rx, value })
}

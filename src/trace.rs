//! Per-path attenuation traces.
//!
//! A trace file is a sequence of `<time> <attenuation>` records sorted by
//! non-decreasing time. [`AttTrace`](AttTrace) replays one lazily, keeping a
//! two-sample window around the queried instant and interpolating linearly
//! inside it. Once the file runs out the path keeps the final attenuation
//! forever, and the trace collapses into a plain constant.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::record::RecordReader;
use crate::{ChannelError, CorruptKind, SimTime};

/// One `(time, attenuation)` trace sample.
type Sample = (SimTime, f64);

/// How the attenuation of one ordered device pair is produced.
pub(crate) enum PathGain<R>
where
    R: Read,
{
    /// Nothing defined this path. Only self-pairs stay here after loading,
    /// and those are never queried.
    Unset,

    /// Fixed attenuation in dB, extra attenuation already folded in.
    Constant(f64),

    /// Attenuation replayed from a trace file.
    Trace(AttTrace<R>),
}

impl<R> PathGain<R>
where
    R: Read,
{
    /// Attenuation of this path at time `now`, in dB.
    ///
    /// Trace-driven paths advance their sample window up to `now` and are
    /// permanently replaced by a [`Constant`](Self::Constant) when their
    /// trace is exhausted.
    ///
    /// # Panics
    ///
    /// Panics when called on an [`Unset`](Self::Unset) path; after loading
    /// only self-pairs are unset, and the host never queries those.
    pub fn attenuation(&mut self, now: SimTime, atxtra: f64) -> Result<f64, ChannelError> {
        match self {
            PathGain::Unset => unreachable!("attenuation queried for an undefined path"),
            PathGain::Constant(att) => Ok(*att),
            PathGain::Trace(trace) => match trace.sample(now)? {
                Sampled::At(att) => Ok(att + atxtra),
                Sampled::Exhausted(att) => {
                    let att = att + atxtra;
                    *self = PathGain::Constant(att);
                    Ok(att)
                }
            },
        }
    }
}

/// Outcome of advancing a trace to a query time.
enum Sampled {
    /// The query time fell inside the trace; interpolated value, without
    /// extra attenuation.
    At(f64),

    /// The trace ran out of records; final value, without extra attenuation.
    /// The caller must stop querying this trace.
    Exhausted(f64),
}

/// An open attenuation trace and its current two-sample window.
///
/// Invariant between calls: `last.0 <= next.0`, and after a query at `now`
/// either `now < next.0` or the trace has reported
/// [`Sampled::Exhausted`](Sampled::Exhausted).
pub(crate) struct AttTrace<R>
where
    R: Read,
{
    reader: RecordReader<R>,
    last: Sample,
    next: Sample,
}

impl AttTrace<File> {
    /// Open the trace at `path` and read its leading window.
    pub fn open(path: &Path, atxtra: f64) -> Result<PathGain<File>, ChannelError> {
        let file = File::open(path).map_err(|source| ChannelError::Open {
            path: path.to_owned(),
            source,
        })?;
        AttTrace::from_reader(RecordReader::new(file, path), atxtra)
    }
}

impl<R> AttTrace<R>
where
    R: Read,
{
    /// Read the leading window of a trace.
    ///
    /// An empty trace is corrupt. A single-sample trace never needs
    /// interpolation and becomes a constant straight away.
    pub fn from_reader(
        mut reader: RecordReader<R>,
        atxtra: f64,
    ) -> Result<PathGain<R>, ChannelError> {
        let first = match reader.read_record()? {
            None => {
                return Err(CorruptKind::EmptyTraceFile.at(reader.path(), ""));
            }
            Some(line) => parse_sample(&line, reader.path())?,
        };
        match reader.read_record()? {
            None => Ok(PathGain::Constant(first.1 + atxtra)),
            Some(line) => {
                let second = parse_sample(&line, reader.path())?;
                Ok(PathGain::Trace(AttTrace {
                    reader,
                    last: first,
                    next: second,
                }))
            }
        }
    }

    /// Advance the window to contain `now` and interpolate.
    fn sample(&mut self, now: SimTime) -> Result<Sampled, ChannelError> {
        while now >= self.next.0 {
            self.last = self.next;
            match self.reader.read_record()? {
                None => return Ok(Sampled::Exhausted(self.last.1)),
                Some(line) => self.next = parse_sample(&line, self.reader.path())?,
            }
        }

        if now <= self.last.0 {
            Ok(Sampled::At(self.last.1))
        } else {
            let frac = (now - self.last.0) as f64 / (self.next.0 - self.last.0) as f64;
            Ok(Sampled::At(self.last.1 + (self.next.1 - self.last.1) * frac))
        }
    }
}

fn parse_sample(line: &str, path: &Path) -> Result<Sample, ChannelError> {
    let mut tokens = line.split_whitespace();
    tokens
        .next()
        .and_then(|t| t.parse::<SimTime>().ok())
        .zip(tokens.next().and_then(|a| a.parse::<f64>().ok()))
        .ok_or_else(|| CorruptKind::BadTraceRecord.at(path, line))
}

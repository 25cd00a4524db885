//! The positional channel model: path loss follows device kinematics.
//!
//! Each device carries a 3-D position driven by a stream of timestamped
//! events (`enable`, `disable`, `set`, `move`). The stream is consumed
//! strictly forward, never past the queried instant: one record of
//! look-ahead separates what has been applied from what is still pending.
//! Attenuation between two positioned devices is a log-distance path-loss
//! law of their momentary Euclidean distance.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::warn;

use crate::record::RecordReader;
use crate::{ChannelError, ConfigError, CorruptKind, SimTime, DISABLED_ATT_DB, ISI_SNR_DB};

/// Path loss at one metre for the 2.4 GHz band: `20 * log10(2400) - 28`.
const PL_1M_2G4_DB: f64 = 39.60422483423212045872;

/// The log-distance law is not valid in the near field; path loss is never
/// reported below this floor.
const MIN_PATH_LOSS_DB: f64 = 20.0;

/// [`PositionalChannel`](PositionalChannel) configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PositionalOptions {
    /// Attenuation in dB for pairs where either device has no position yet.
    pub att: f64,

    /// Extra attenuation in dB added to every reported value.
    pub atxtra: f64,

    /// The position stream: a file or FIFO of movement events. With `None`
    /// no device ever gets a position.
    pub stream: Option<PathBuf>,

    /// Exponent of the log-distance path-loss law. 2 is free space.
    pub distance_exp: f64,
}

impl Default for PositionalOptions {
    fn default() -> Self {
        PositionalOptions {
            att: 60.0,
            atxtra: 0.0,
            stream: None,
            distance_exp: 2.0,
        }
    }
}

impl PositionalOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.att < -100.0 || self.att > 100.0 {
            return Err(ConfigError::AttenuationRange(self.att));
        }
        if self.atxtra < -100.0 || self.atxtra > 100.0 {
            return Err(ConfigError::ExtraAttenuationRange(self.atxtra));
        }
        if self.distance_exp < 1.0 || self.distance_exp > 4.0 {
            return Err(ConfigError::DistanceExpRange(self.distance_exp));
        }
        Ok(())
    }
}

/// A point in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Pos {
    x: f64,
    y: f64,
    z: f64,
}

impl Pos {
    fn distance(self, other: Pos) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    fn lerp(self, to: Pos, frac: f64) -> Pos {
        Pos {
            x: self.x + frac * (to.x - self.x),
            y: self.y + frac * (to.y - self.y),
            z: self.z + frac * (to.z - self.z),
        }
    }
}

/// Kinematic state of one device.
///
/// `last` and `next` bound the current movement segment,
/// `last_time <= next_time`; outside the segment the nearer endpoint holds.
#[derive(Debug, Clone)]
struct Device {
    enabled: bool,
    has_position: bool,
    last_time: SimTime,
    next_time: SimTime,
    last_pos: Pos,
    next_pos: Pos,
    /// Most recently interpolated position, keyed by its query time.
    cache: Option<(SimTime, Pos)>,
}

impl Default for Device {
    fn default() -> Self {
        Device {
            enabled: true,
            has_position: false,
            last_time: 0,
            next_time: 0,
            last_pos: Pos::default(),
            next_pos: Pos::default(),
            cache: None,
        }
    }
}

impl Device {
    /// Position at `t`. The `t >= next_time` check comes first so that a
    /// zero-length segment resolves to its endpoint rather than dividing by
    /// zero.
    fn interpolated(&self, t: SimTime) -> Pos {
        debug_assert!(self.has_position);
        if t >= self.next_time {
            self.next_pos
        } else if t <= self.last_time {
            self.last_pos
        } else {
            let frac = (t - self.last_time) as f64 / (self.next_time - self.last_time) as f64;
            self.last_pos.lerp(self.next_pos, frac)
        }
    }

    /// Cached variant of [`interpolated`](Self::interpolated): a transmitter
    /// is usually relevant for several receivers in the same instant.
    fn position(&mut self, t: SimTime) -> Pos {
        match self.cache {
            Some((cached_t, pos)) if cached_t == t => pos,
            _ => {
                let pos = self.interpolated(t);
                self.cache = Some((t, pos));
                pos
            }
        }
    }
}

/// The position stream and how far into simulated time it has been applied.
struct Stream<R>
where
    R: Read,
{
    reader: RecordReader<R>,

    /// One-record look-ahead; `None` once the stream hit EOF.
    pending: Option<String>,

    /// Every event with a timestamp `<= parsed_time` has been applied.
    parsed_time: SimTime,

    /// Distinguishes "parsed up to time 0" from "nothing parsed yet".
    initialized: bool,
}

enum EventKind {
    Enable,
    Disable,
    Set(Pos),
    Move(Pos, SimTime),
}

struct Event {
    time: SimTime,
    device: usize,
    kind: EventKind,
}

/// Channel model deriving attenuation from device positions.
pub struct PositionalChannel<R = File>
where
    R: Read,
{
    att: f64,
    atxtra: f64,
    distance_exp: f64,
    devices: Vec<Device>,
    stream: Option<Stream<R>>,
    near_field_warned: bool,
}

impl PositionalChannel<File> {
    /// Validate `options` and open the configured position stream.
    pub fn new(
        options: &PositionalOptions,
        n_devices: usize,
    ) -> Result<PositionalChannel<File>, ChannelError> {
        options.validate()?;
        let reader = match &options.stream {
            None => None,
            Some(path) => {
                let file = File::open(path).map_err(|source| ChannelError::Open {
                    path: path.clone(),
                    source,
                })?;
                Some(RecordReader::new(file, path))
            }
        };
        Self::build(options, n_devices, reader)
    }
}

impl<R> PositionalChannel<R>
where
    R: Read,
{
    /// Like [`new`](PositionalChannel::new), but with the event stream
    /// coming from an arbitrary reader. `label` stands in for the file name
    /// in diagnostics.
    pub fn from_reader(
        options: &PositionalOptions,
        n_devices: usize,
        reader: R,
        label: impl Into<PathBuf>,
    ) -> Result<PositionalChannel<R>, ChannelError> {
        options.validate()?;
        Self::build(options, n_devices, Some(RecordReader::new(reader, label)))
    }

    fn build(
        options: &PositionalOptions,
        n_devices: usize,
        reader: Option<RecordReader<R>>,
    ) -> Result<PositionalChannel<R>, ChannelError> {
        let stream = match reader {
            None => None,
            Some(mut reader) => {
                let pending = reader.read_record()?;
                Some(Stream {
                    reader,
                    pending,
                    parsed_time: 0,
                    initialized: false,
                })
            }
        };
        Ok(PositionalChannel {
            att: options.att,
            atxtra: options.atxtra,
            distance_exp: options.distance_exp,
            devices: vec![Device::default(); n_devices],
            stream,
            near_field_warned: false,
        })
    }

    pub fn n_devices(&self) -> usize {
        self.devices.len()
    }

    /// Apply every pending event with a timestamp `<= now`.
    ///
    /// An event with a later timestamp stays in the look-ahead buffer and
    /// marks everything up to (but excluding) its timestamp as parsed.
    /// Events must come in strictly increasing time order; an event at or
    /// before `parsed_time` is corrupt. Events for unknown devices are
    /// skipped with a warning.
    pub fn advance_until(&mut self, now: SimTime) -> Result<(), ChannelError> {
        let PositionalChannel {
            stream, devices, ..
        } = self;
        let stream = match stream {
            None => return Ok(()),
            Some(stream) => stream,
        };

        if stream.initialized && now <= stream.parsed_time {
            return Ok(());
        }

        while let Some(line) = stream.pending.take() {
            let time = event_time(&line, stream.reader.path())?;
            if stream.initialized && time <= stream.parsed_time {
                return Err(CorruptKind::OutOfOrderEvent {
                    time,
                    parsed: stream.parsed_time,
                }
                .at(stream.reader.path(), &line));
            }
            if time > now {
                debug_assert!(!stream.initialized || stream.parsed_time <= time - 1);
                stream.parsed_time = time - 1;
                stream.initialized = true;
                stream.pending = Some(line);
                break;
            }

            let event = parse_event(&line, stream.reader.path())?;
            match devices.get_mut(event.device) {
                None => warn!(
                    "{}: event {:?} is for unknown device {}, skipping",
                    stream.reader.path().display(),
                    line,
                    event.device
                ),
                Some(device) => apply_event(device, &event, stream.reader.path(), &line)?,
            }

            stream.pending = stream.reader.read_record()?;
        }

        Ok(())
    }

    /// Attenuation of the `tx -> rx` path at time `now`, in dB.
    ///
    /// The stream must already be advanced to `now`. A muted endpoint turns
    /// the path into the [`DISABLED_ATT_DB`](DISABLED_ATT_DB) sentinel; a
    /// positionless endpoint falls back to the default attenuation.
    pub fn attenuation(&mut self, tx: usize, rx: usize, now: SimTime) -> f64 {
        if !self.devices[tx].enabled || !self.devices[rx].enabled {
            return DISABLED_ATT_DB;
        }
        if !self.devices[tx].has_position || !self.devices[rx].has_position {
            return self.att + self.atxtra;
        }

        let pos_tx = self.devices[tx].position(now);
        let pos_rx = self.devices[rx].position(now);
        self.path_loss(pos_tx.distance(pos_rx)) + self.atxtra
    }

    /// Log-distance path loss in dB for a distance in metres.
    fn path_loss(&mut self, mut distance: f64) -> f64 {
        if distance <= 0.0 {
            if distance < 0.0 {
                warn!(
                    "distance between devices is {} m, this seems like an error",
                    distance
                );
            }
            distance = 0.001;
        }

        let pl = self.distance_exp * 10.0 * distance.log10() + PL_1M_2G4_DB;
        if pl < MIN_PATH_LOSS_DB {
            if !self.near_field_warned {
                self.near_field_warned = true;
                warn!(
                    "devices are only {:.3} m apart; path loss ({:.1} dB) limited to {} dB, \
                     near field conditions are not modelled (warned once)",
                    distance, pl, MIN_PATH_LOSS_DB
                );
            }
            return MIN_PATH_LOSS_DB;
        }
        pl
    }

    /// Advance the stream to `now`, then write into `att[i]`, for every `i`
    /// with `tx_used[i]`, the attenuation of the path `i -> rx_nbr`. Other
    /// entries of `att` are left untouched. Returns the ISI-SNR ceiling
    /// (always [`ISI_SNR_DB`](ISI_SNR_DB)).
    ///
    /// # Panics
    ///
    /// Panics if `tx_used` or `att` are not exactly `n_devices` long or if
    /// `rx_nbr` is out of range.
    pub fn calc(
        &mut self,
        tx_used: &[bool],
        rx_nbr: usize,
        now: SimTime,
        att: &mut [f64],
    ) -> Result<f64, ChannelError> {
        assert_eq!(tx_used.len(), self.devices.len());
        assert_eq!(att.len(), self.devices.len());
        assert!(rx_nbr < self.devices.len());

        self.advance_until(now)?;
        for tx in 0..self.devices.len() {
            if tx_used[tx] {
                att[tx] = self.attenuation(tx, rx_nbr, now);
            }
        }
        Ok(ISI_SNR_DB)
    }
}

/// Peek the timestamp off an event record without parsing the rest.
fn event_time(line: &str, path: &Path) -> Result<SimTime, ChannelError> {
    line.split_whitespace()
        .next()
        .and_then(|t| t.parse::<SimTime>().ok())
        .ok_or_else(|| CorruptKind::BadEvent.at(path, line))
}

fn parse_event(line: &str, path: &Path) -> Result<Event, ChannelError> {
    fn coords(
        tokens: &mut std::str::SplitWhitespace,
        path: &Path,
        line: &str,
    ) -> Result<Pos, ChannelError> {
        let mut coord = [0.0; 3];
        for c in coord.iter_mut() {
            *c = tokens
                .next()
                .and_then(|t| t.parse::<f64>().ok())
                .ok_or_else(|| CorruptKind::BadEvent.at(path, line))?;
        }
        Ok(Pos {
            x: coord[0],
            y: coord[1],
            z: coord[2],
        })
    }

    let corrupt = || CorruptKind::BadEvent.at(path, line);
    let mut tokens = line.split_whitespace();

    let time = tokens
        .next()
        .and_then(|t| t.parse::<SimTime>().ok())
        .ok_or_else(corrupt)?;
    let command = tokens.next().ok_or_else(corrupt)?;
    let device = tokens
        .next()
        .and_then(|t| t.parse::<usize>().ok())
        .ok_or_else(corrupt)?;

    let kind = match command {
        "enable" => EventKind::Enable,
        "disable" => EventKind::Disable,
        "set" => EventKind::Set(coords(&mut tokens, path, line)?),
        "move" => {
            let target = coords(&mut tokens, path, line)?;
            let duration = tokens
                .next()
                .and_then(|t| t.parse::<SimTime>().ok())
                .ok_or_else(corrupt)?;
            EventKind::Move(target, duration)
        }
        other => {
            return Err(CorruptKind::UnknownCommand(other.to_owned()).at(path, line));
        }
    };

    Ok(Event { time, device, kind })
}

fn apply_event(
    device: &mut Device,
    event: &Event,
    path: &Path,
    line: &str,
) -> Result<(), ChannelError> {
    match event.kind {
        EventKind::Enable => device.enabled = true,
        EventKind::Disable => device.enabled = false,
        EventKind::Set(pos) => {
            device.last_time = event.time;
            device.next_time = event.time;
            device.last_pos = pos;
            device.next_pos = pos;
            device.has_position = true;
            device.cache = None;
        }
        EventKind::Move(target, duration) => {
            if !device.has_position {
                return Err(CorruptKind::MoveWithoutPosition(event.device).at(path, line));
            }
            // Freeze wherever the device is right now, then head for the
            // target. A zero duration is an immediate jump.
            let from = device.interpolated(event.time);
            device.last_time = event.time;
            device.last_pos = from;
            device.next_time = event.time + duration;
            device.next_pos = target;
            device.cache = None;
        }
    }
    Ok(())
}

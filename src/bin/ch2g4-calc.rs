use anyhow::{Context, Result};
use ch2g4::{Channel, MatrixOptions, PositionalOptions, SimTime};
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
    about = "Replays a 2.4 GHz channel attenuation model over a span of simulated time and \
             prints the attenuation of every path. These are non realistic channel models: \
             NxN independent paths, each with an attenuation that is either configured \
             (possibly changing over time) or derived from the simulated positions of the \
             devices."
)]
enum Opt {
    /// NxN paths with constant or trace-driven attenuations.
    Matrix {
        #[structopt(flatten)]
        common: Common,

        /// File containing the attenuation of each NxN path.
        #[structopt(long = "--file", parse(from_os_str))]
        matrix_file: Option<PathBuf>,
    },

    /// Path loss derived from device positions driven by a movement stream.
    Positional {
        #[structopt(flatten)]
        common: Common,

        /// Stream or file containing the movement events of each device.
        #[structopt(long = "--stream", parse(from_os_str))]
        stream: Option<PathBuf>,

        /// Distance exponent of the path-loss law.
        #[structopt(long = "--exp", default_value = "2")]
        distance_exp: f64,
    },
}

#[derive(StructOpt, Debug)]
struct Common {
    /// Number of simulated devices.
    #[structopt(long = "--devices")]
    devices: usize,

    /// Default attenuation in dB, used for every path the model does not
    /// define otherwise.
    #[structopt(long = "--at", default_value = "60")]
    att: f64,

    /// Extra attenuation in dB added to every path.
    #[structopt(long = "--atextra", default_value = "0")]
    atxtra: f64,

    /// First queried time, in simulated microseconds.
    #[structopt(long = "--from", default_value = "0")]
    from: SimTime,

    /// Last queried time, in simulated microseconds.
    #[structopt(long = "--until")]
    until: SimTime,

    /// Interval between queries, in simulated microseconds.
    #[structopt(long = "--step", default_value = "1000000")]
    step: SimTime,
}

fn main() -> Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let (common, mut channel) = match opt {
        Opt::Matrix {
            common,
            matrix_file,
        } => {
            let options = MatrixOptions {
                att: common.att,
                atxtra: common.atxtra,
                matrix_file,
            };
            let channel = Channel::matrix(&options, common.devices)
                .context("failed to build the matrix channel")?;
            (common, channel)
        }
        Opt::Positional {
            common,
            stream,
            distance_exp,
        } => {
            let options = PositionalOptions {
                att: common.att,
                atxtra: common.atxtra,
                stream,
                distance_exp,
            };
            let channel = Channel::positional(&options, common.devices)
                .context("failed to build the positional channel")?;
            (common, channel)
        }
    };

    let n = channel.n_devices();
    let mut att = vec![0.0; n];
    let mut tx_used = vec![false; n];

    let mut now = common.from;
    while now <= common.until {
        for rx in 0..n {
            for tx in 0..n {
                tx_used[tx] = tx != rx;
            }
            channel
                .calc(&tx_used, rx, now, &mut att)
                .with_context(|| format!("channel calculation failed at time {}", now))?;
            for tx in 0..n {
                if tx != rx {
                    println!("{} {}->{} {:.3}", now, tx, rx, att[tx]);
                }
            }
        }
        match now.checked_add(common.step) {
            Some(next) if common.step > 0 => now = next,
            _ => break,
        }
    }

    Ok(())
}

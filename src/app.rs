//! Command line interface and logger setup.

use clap::Parser;
use std::{
    io::Write,
    path::PathBuf,
    time::{Duration, SystemTime},
};

/// Command line arguments.
#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "Renders spherical views of a scene and reduces them to visibility metrics."
)]
pub struct CubevisArgs {
    /// Path of the run description file (JSON).
    pub input_path: PathBuf,

    /// Writes the result file to a different path than the one configured
    /// in the run description.
    #[clap(short, long)]
    pub output_path: Option<PathBuf>,

    /// Picks the GPU adapter with the given index instead of the one the
    /// backend prefers.
    #[clap(long)]
    pub adapter: Option<usize>,

    /// Silences all messages printed to stdout.
    #[clap(short, long)]
    pub quiet: bool,

    /// Uses verbose output (log level = 4).
    #[clap(short, long)]
    pub verbose: bool,

    /// Shows the timestamp of each log message.
    #[clap(long)]
    pub log_timestamp: bool,

    /// Sets the log level filter.
    ///
    /// 0 = error, 1 = warn + error, 2 = info + warn + error,
    /// 3 = debug + info + warn + error, 4 = trace + all above
    #[clap(long, default_value_t = 2)]
    pub log_level: u8,
}

impl CubevisArgs {
    fn effective_log_level(&self) -> u8 {
        if self.verbose {
            4
        } else if self.quiet {
            0
        } else {
            self.log_level
        }
    }
}

/// Initialises the logger from the parsed arguments. Timestamps count from
/// `launch_time`.
pub fn init(args: &CubevisArgs, launch_time: SystemTime) {
    let log_level = args.effective_log_level();
    let timestamp = args.log_timestamp;

    // wgpu is chatty at info level, keep it quiet unless asked for.
    let wgpu_log_level = if log_level > 2 {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Error
    };

    env_logger::builder()
        .format(move |buf, record| {
            if timestamp {
                let duration = launch_time.elapsed().unwrap_or(Duration::ZERO);
                let millis = duration.as_millis() % 1000;
                let seconds = duration.as_secs() % 60;
                let minutes = (duration.as_secs() / 60) % 60;
                let hours = duration.as_secs() / 3600;
                if record.level() <= log::Level::Warn {
                    writeln!(
                        buf,
                        "{}:{}:{}.{:03} {}: {}",
                        hours,
                        minutes,
                        seconds,
                        millis,
                        record.level(),
                        record.args()
                    )
                } else {
                    writeln!(
                        buf,
                        "{}:{}:{}.{:03} {}",
                        hours, minutes, seconds, millis,
                        record.args()
                    )
                }
            } else if record.level() <= log::Level::Warn {
                writeln!(buf, "{}: {}", record.level(), record.args())
            } else {
                writeln!(buf, "{}", record.args())
            }
        })
        .filter(Some("wgpu"), wgpu_log_level)
        .filter_level(match log_level {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Warn,
            2 => log::LevelFilter::Info,
            3 => log::LevelFilter::Debug,
            4 => log::LevelFilter::Trace,
            _ => log::LevelFilter::Info,
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_overrides_log_level() {
        let args = CubevisArgs::parse_from(["cubevis", "run.json", "-v", "--log-level", "1"]);
        assert_eq!(args.effective_log_level(), 4);
    }

    #[test]
    fn quiet_silences_output() {
        let args = CubevisArgs::parse_from(["cubevis", "run.json", "-q"]);
        assert_eq!(args.effective_log_level(), 0);
    }

    #[test]
    fn defaults_to_info_level() {
        let args = CubevisArgs::parse_from(["cubevis", "run.json"]);
        assert_eq!(args.effective_log_level(), 2);
        assert!(args.output_path.is_none());
        assert!(args.adapter.is_none());
    }
}

mod hardware;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use icepick_core::agent::AgentConfig;
use icepick_core::math::SenseCalibration;

use session::{Session, TranscriptProfile};

const USAGE: &str = "Usage: icepick-emulator [--profile <sense|gpio|clock>] [--k-time <n>] \
                     [--k-scale <n>] [--vsense-mv <n>]";

struct Options {
    profile: TranscriptProfile,
    calibration: SenseCalibration,
    vsense_mv: Option<u32>,
}

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let config = AgentConfig::default().with_sense(options.calibration);
    let mut session = Session::new(options.profile, config)?;
    if let Some(millivolts) = options.vsense_mv {
        session.hardware().set_vsense_mv(millivolts);
    }
    let mut line = String::new();

    writeln!(
        writer,
        "iCEpick emulator ready (k_time={}, k_scale={}). Type `help` for commands or `exit` to quit.",
        options.calibration.k_time, options.calibration.k_scale
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options {
        profile: TranscriptProfile::Sense,
        calibration: SenseCalibration::REFERENCE,
        vsense_mv: None,
    };

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let mut value = || {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| format!("Expected value after {flag}"))
        };

        match flag.as_str() {
            "--profile" => options.profile = TranscriptProfile::from_tag(&value()?)?,
            "--k-time" => options.calibration.k_time = parse_number(&value()?)?,
            "--k-scale" => options.calibration.k_scale = parse_number(&value()?)?,
            "--vsense-mv" => options.vsense_mv = Some(parse_number(&value()?)?),
            other if !other.starts_with('-') => {
                options.profile = TranscriptProfile::from_tag(other)?;
            }
            other => return Err(format!("Unknown option `{other}`")),
        }
    }

    Ok(options)
}

fn parse_number<T: std::str::FromStr>(text: &str) -> Result<T, String> {
    text.parse()
        .map_err(|_| format!("Expected a number, got `{text}`"))
}

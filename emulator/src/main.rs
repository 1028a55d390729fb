mod commands;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use session::{Session, WheelProfile};

fn main() -> io::Result<()> {
    let profile = parse_profile().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: engine-emulator [--wheel <tfi|cam24|36-1>]");
        process::exit(2);
    });

    let mut session = Session::new(profile).unwrap_or_else(|err| {
        eprintln!("invalid engine configuration: {err}");
        process::exit(1);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut line = String::new();

    writeln!(
        writer,
        "ViaEMS engine emulator ({profile:?} wheel). Type `help` for commands or `exit` to quit."
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

        let Some(responses) = session.handle_command(trimmed) else {
            writeln!(writer, "Session closed.")?;
            break;
        };
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn parse_profile() -> Result<WheelProfile, String> {
    let mut args = env::args().skip(1);
    match args.next() {
        Some(arg) => {
            if let Some(value) = arg.strip_prefix("--wheel=") {
                WheelProfile::from_tag(value)
            } else if arg == "--wheel" {
                args.next()
                    .ok_or_else(|| "Expected value after --wheel".to_string())
                    .and_then(|value| WheelProfile::from_tag(&value))
            } else {
                WheelProfile::from_tag(&arg)
            }
        }
        None => Ok(WheelProfile::Tfi),
    }
}

//! Print the layout plan of one or more schema files.
//!
//! Usage:
//!   dump_plan [OPTIONS] FILE.json ...
//!
//! Options:
//!   --protocol, -p tlv|fixed   Protocol variant (default: fixed)
//!   --verbose, -v              Fragment origins, struct usage and debug logging
//!
//! Exits with status 1 if any schema fails to load or lay out.

use anyhow::{bail, Context};
use modemgen::{dump, generate_file, Options, ProtocolVariant};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

fn take_flag(args: &mut Vec<String>, long: &str, short: &str) -> bool {
    match args.iter().position(|a| a == long || a == short) {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    }
}

fn take_value(args: &mut Vec<String>, long: &str, short: &str) -> anyhow::Result<Option<String>> {
    let Some(pos) = args.iter().position(|a| a == long || a == short) else {
        return Ok(None);
    };
    args.remove(pos);
    if pos >= args.len() {
        bail!("{} needs a value", long);
    }
    Ok(Some(args.remove(pos)))
}

fn main() -> anyhow::Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = take_flag(&mut args, "--verbose", "-v");
    let variant = match take_value(&mut args, "--protocol", "-p")? {
        Some(v) => v
            .parse::<ProtocolVariant>()
            .map_err(anyhow::Error::msg)
            .context("--protocol")?,
        None => ProtocolVariant::Fixed,
    };
    if args.is_empty() {
        bail!("usage: dump_plan [--protocol tlv|fixed] [--verbose] FILE...");
    }

    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };
    TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)
        .context("logger")?;

    let options = Options::new(variant);
    let mut has_error = false;
    for path in &args {
        match generate_file(path, &options) {
            Ok(plan) => {
                let text = dump::render(&plan, verbose).context("render")?;
                println!("# {}", path);
                print!("{}", text);
            }
            Err(e) => {
                eprintln!("{}: {}", path, e);
                has_error = true;
            }
        }
    }
    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

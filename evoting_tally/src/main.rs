use std::{path::Path, process};

use clap::{App, Arg, value_t};
use common::{error::Error, group::GroupParameters};
use evoting_tally::{config::ElectionConfig, keyfile::save_key_files, wire::WireRecord};
use log::{LevelFilter, info};

fn is_count(value: String) -> Result<(), String> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(()),
        _ => Err(format!("{value} is not a positive integer")),
    }
}

fn run(dir: &Path, authorities: usize, threshold: usize) -> Result<(), Error> {
    let config = ElectionConfig::new(authorities, threshold)?;
    let group = GroupParameters::modp_2048()?;
    let mut rng = rand::rng();

    info!("running a {threshold}-of-{authorities} key ceremony");
    let (public_key, shares) = config.run_key_ceremony(&group, &mut rng)?;

    let written = save_key_files(dir, &public_key, &shares)?;

    let fingerprint = blake3::hash(&public_key.to_bytes());
    println!(
        "public key fingerprint: {}",
        hex::encode(&fingerprint.as_bytes()[..16])
    );
    for path in written {
        println!("{}", path.display());
    }

    Ok(())
}

fn main() {
    let matches = App::new("evoting-keygen")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Runs a threshold key ceremony and writes the election key files")
        .arg(
            Arg::with_name("DIR")
                .index(1)
                .required(true)
                .help("Directory to write public.key and the private key share files into"),
        )
        .arg(
            Arg::with_name("authorities")
                .long("authorities")
                .short("n")
                .takes_value(true)
                .default_value("1")
                .validator(is_count)
                .help("Number of key authorities"),
        )
        .arg(
            Arg::with_name("threshold")
                .long("threshold")
                .short("t")
                .takes_value(true)
                .validator(is_count)
                .help("Shares needed to decrypt [default: all authorities]"),
        )
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity"),
        )
        .get_matches();

    let level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let authorities = value_t!(matches, "authorities", usize).unwrap_or_else(|e| e.exit());
    let threshold = if matches.is_present("threshold") {
        value_t!(matches, "threshold", usize).unwrap_or_else(|e| e.exit())
    } else {
        authorities
    };

    // DIR is required, clap has already exited without it
    let dir = Path::new(matches.value_of("DIR").unwrap_or_default());

    if let Err(e) = run(dir, authorities, threshold) {
        eprintln!("evoting-keygen: {e}");
        for cause in e.iter().skip(1) {
            eprintln!("  caused by: {cause}");
        }
        process::exit(1);
    }
}

use captune::app::{self, AppOptions};
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let options = parse_args(std::env::args().skip(1).collect())?;

    if let Err(err) = captune::logging::init() {
        eprintln!("captune: logging disabled: {err:#}");
    }

    app::run(options)
}

fn parse_args(args: Vec<String>) -> anyhow::Result<AppOptions> {
    let mut out = AppOptions::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--null-audio" => out.null_audio = true,
            "--recursive" => out.recursive = true,
            "--seed" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--seed requires a number");
                };
                let seed = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|err| anyhow::anyhow!("invalid --seed value {value:?}: {err}"))?;
                out.seed = Some(seed);
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with('-') => anyhow::bail!("unknown argument {other}"),
            directory => {
                if out.directory.is_some() {
                    anyhow::bail!("only one directory can be given");
                }
                out.directory = Some(PathBuf::from(directory));
            }
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("captune [DIR] [options]");
    println!("  DIR               Directory to load (defaults to the last one used)");
    println!("  --null-audio      Play silently without opening an audio device");
    println!("  --recursive       Include audio files in subdirectories");
    println!("  --seed N          Seed for reproducible shuffles");
}

use anyhow::{bail, Result};
use std::path::PathBuf;

pub const USAGE: &str = "\
usage: resq-vehicle-console [--config <path>] <command>

commands:
  run                          start the dispatch core and read driver input from stdin
  session show                 print the cached vehicle identity
  session set <token> <json>   cache a vehicle identity as the login flow would
  session clear                forget the cached identity

options:
  --config <path>   TOML configuration (defaults plus RESQ_* environment overrides otherwise)
  --version         print the version and exit
  -h, --help        print this help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Run,
    SessionShow,
    SessionSet { token: String, info: String },
    SessionClear,
    Version,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub config: Option<PathBuf>,
    pub invocation: Invocation,
}

pub fn parse(args: &[String]) -> Result<Cli> {
    let mut config = None;
    let mut words = Vec::new();

    let mut args_iter = args.iter().skip(1);
    while let Some(arg) = args_iter.next() {
        match arg.as_str() {
            "--config" => match args_iter.next() {
                Some(path) => config = Some(PathBuf::from(path)),
                None => bail!("--config was provided without a path"),
            },
            "--version" => {
                return Ok(Cli {
                    config,
                    invocation: Invocation::Version,
                })
            }
            "-h" | "--help" => {
                return Ok(Cli {
                    config,
                    invocation: Invocation::Help,
                })
            }
            flag if flag.starts_with("--") => bail!("unknown option {}\n\n{}", flag, USAGE),
            word => words.push(word.to_string()),
        }
    }

    let words: Vec<&str> = words.iter().map(String::as_str).collect();
    let invocation = match words.as_slice() {
        [] | ["run"] => Invocation::Run,
        ["session", "show"] => Invocation::SessionShow,
        ["session", "clear"] => Invocation::SessionClear,
        ["session", "set", token, info] => Invocation::SessionSet {
            token: token.to_string(),
            info: info.to_string(),
        },
        _ => bail!("unrecognized command '{}'\n\n{}", words.join(" "), USAGE),
    };

    Ok(Cli { config, invocation })
}

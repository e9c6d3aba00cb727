use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{info, warn};

use galena_server::broadcast::NullSink;
use galena_server::commands::parse_command;
use galena_server::config::ServerConfig;
use galena_server::server::Server;

struct Options {
    config: PathBuf,
    data_dir: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> io::Result<Options> {
    let mut options = Options {
        config: PathBuf::from("galena.toml"),
        data_dir: None,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let Some(path) = args.next() else {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "--config requires a path",
                    ));
                };
                options.config = PathBuf::from(path);
            }
            "--data-dir" => {
                let Some(path) = args.next() else {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "--data-dir requires a path",
                    ));
                };
                options.data_dir = Some(PathBuf::from(path));
            }
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unknown argument '{other}'; usage: galena_server [--config <path>] [--data-dir <path>]"),
                ));
            }
        }
    }
    Ok(options)
}

fn main() -> io::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let options = parse_args(std::env::args().skip(1))?;
    let mut config = ServerConfig::load_or_default(&options.config)?;
    if let Some(data_dir) = options.data_dir {
        config.data_dir = data_dir;
    }
    info!("Data directory: {}", config.data_dir.display());

    let mut server = Server::new(config, Arc::new(NullSink))?;

    let running = server.running_flag();
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;

    // Console thread; ends when stdin closes, the loop ends on the flag.
    let commands = server.command_sender();
    std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => commands.send_lossy(parse_command(&line)),
                    Err(err) => {
                        warn!("Console read failed: {err}");
                        break;
                    }
                }
            }
        })
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;

    server.run()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::parse_args;

    fn args<'a>(list: &'a [&'a str]) -> impl Iterator<Item = String> + 'a {
        list.iter().map(|s| s.to_string())
    }

    #[test]
    fn defaults_and_overrides() {
        let options = parse_args(args(&[])).expect("no args");
        assert_eq!(options.config, PathBuf::from("galena.toml"));
        assert!(options.data_dir.is_none());

        let options =
            parse_args(args(&["--config", "cfg.toml", "--data-dir", "worlds"])).expect("args");
        assert_eq!(options.config, PathBuf::from("cfg.toml"));
        assert_eq!(options.data_dir, Some(PathBuf::from("worlds")));
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(parse_args(args(&["--config"])).is_err());
        assert!(parse_args(args(&["--verbose"])).is_err());
    }
}

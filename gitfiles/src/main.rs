mod supervisor;

use clap::Parser;
use gitfiles_core::debug::{self, DebugLevel};

const USAGE: &str = "usage: gitfiles [-9] [-D]";

#[derive(Debug, Parser)]
#[command(name = "gitfiles", disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    /// Log every 9P message exchanged with acme and the plumber.
    #[arg(short = '9')]
    chatty9p: bool,

    /// Start at debug level minimal.
    #[arg(short = 'D')]
    debug: bool,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(_) => {
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    };

    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Trace)
        .parse_default_env()
        .format_timestamp(None)
        .init();
    debug::set(if cli.debug {
        DebugLevel::Minimal
    } else {
        DebugLevel::Off
    });
    log::debug!("gitfiles starting");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("cannot start runtime: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(supervisor::run(cli.chatty9p)) {
        log::error!("gitfiles: {}", e);
        std::process::exit(1);
    }
}

//! CLI entry point (§6): flag parsing, config load and dispatch into either
//! the `-daemonstop` client path or the main daemon run loop.

mod app;
mod daemon;
mod demo;
mod shutdown;

use std::path::{Path, PathBuf};

use clap::{App, Arg};
use slog::info;

use epg_core::config::RcFile;
use epg_core::logging::{self, LoggingConfig};
use epg_proto::codec::Codec;
use epg_proto::message::MsgType;
use epg_proto::transport::{self, ConnState, LOCAL_SOCKET_PATH};

const EXIT_OK: i32 = 0;
const EXIT_BAD_CLI: i32 = 1;
const EXIT_DRIVER: i32 = 2;
const EXIT_RCFILE: i32 = 3;

fn main() {
    let matches = App::new("epgd")
        .version("0.1.0")
        .author("nxtvepg contributors")
        .about("EPG acquisition daemon")
        .arg(Arg::with_name("daemon").long("daemon").help("detach into the background"))
        .arg(
            Arg::with_name("daemonstop")
                .long("daemonstop")
                .help("tell a running daemon to shut down, then exit"),
        )
        .arg(
            Arg::with_name("acqpassive")
                .long("acqpassive")
                .help("never key the tuner, only listen on whatever channel is already tuned"),
        )
        .arg(
            Arg::with_name("card")
                .long("card")
                .takes_value(true)
                .help("tuner card index"),
        )
        .arg(
            Arg::with_name("dbdir")
                .long("dbdir")
                .takes_value(true)
                .help("directory holding the per-provider database files"),
        )
        .arg(
            Arg::with_name("demo")
                .long("demo")
                .takes_value(true)
                .help("replay a captured AI/PI log instead of driving a tuner"),
        )
        .arg(
            Arg::with_name("rcfile")
                .long("rcfile")
                .takes_value(true)
                .help("path to the .rc config file"),
        )
        .get_matches();

    if matches.is_present("daemonstop") {
        std::process::exit(run_daemonstop());
    }

    let rcfile_path = matches
        .value_of("rcfile")
        .map(PathBuf::from)
        .unwrap_or_else(default_rcfile_path);

    let rc = if rcfile_path.exists() {
        match RcFile::load(&rcfile_path) {
            Ok(rc) => Some(rc),
            Err(e) => {
                eprintln!("error reading {}: {}", rcfile_path.display(), e);
                std::process::exit(EXIT_RCFILE);
            }
        }
    } else {
        None
    };

    let dbdir = matches
        .value_of("dbdir")
        .map(PathBuf::from)
        .or_else(|| rc.as_ref().and_then(|rc| rc.get("DATABASE", "dir")).map(PathBuf::from))
        .unwrap_or_else(default_dbdir);

    let card: u32 = match matches.value_of("card") {
        Some(s) => match s.parse() {
            Ok(n) => n,
            Err(_) => {
                eprintln!("bad -card value: {}", s);
                std::process::exit(EXIT_BAD_CLI);
            }
        },
        None => rc
            .as_ref()
            .and_then(|rc| rc.get("TV CARDS", "card_index"))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
    };

    let acqpassive = matches.is_present("acqpassive")
        || rc
            .as_ref()
            .and_then(|rc| rc.get("ACQUISITION", "mode"))
            .map(|m| m.eq_ignore_ascii_case("passive"))
            .unwrap_or(false);

    let demo_file = matches.value_of("demo").map(PathBuf::from);

    let bind_addr = rc
        .as_ref()
        .and_then(|rc| rc.get("CLIENT SERVER", "bind_addr"))
        .unwrap_or("127.0.0.1")
        .to_string();
    let port: u16 = rc
        .as_ref()
        .and_then(|rc| rc.get("CLIENT SERVER", "port"))
        .and_then(|s| s.parse().ok())
        .unwrap_or(7658);
    let use_tcp = rc
        .as_ref()
        .and_then(|rc| rc.get("CLIENT SERVER", "transport"))
        .map(|t| t.eq_ignore_ascii_case("tcp"))
        .unwrap_or(!cfg!(unix));

    let opts = app::Options {
        dbdir,
        demo_file,
        acqpassive,
        card,
        use_tcp,
        bind_addr,
        port,
    };

    if matches.is_present("daemon") {
        if let Err(e) = daemon::detach() {
            eprintln!("failed to detach: {}", e);
            std::process::exit(EXIT_DRIVER);
        }
    }

    let log = logging::init(&LoggingConfig {
        verbose: false,
        to_stderr: !matches.is_present("daemon"),
    });
    info!(log, "epgd starting"; "dbdir" => %opts.dbdir.display());

    match app::run(opts, log) {
        Ok(()) => std::process::exit(EXIT_OK),
        Err(e) => {
            eprintln!("daemon error: {}", e);
            std::process::exit(EXIT_DRIVER);
        }
    }
}

fn default_rcfile_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".nxtvepgrc")
}

fn default_dbdir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".nxtvepg")
}

/// `-daemonstop`: connect to the local socket, send a bare `CLOSE_IND`, and
/// wait for it to drain before exiting. Returns the process exit code.
fn run_daemonstop() -> i32 {
    let socket = match transport::connect_unix(LOCAL_SOCKET_PATH) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("no running daemon at {}: {}", LOCAL_SOCKET_PATH, e);
            return EXIT_DRIVER;
        }
    };

    let codec = Codec::new(false);
    let framed = match codec.build(MsgType::CloseInd, &[]) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("failed to build shutdown message: {:?}", e);
            return EXIT_DRIVER;
        }
    };

    let mut conn = ConnState::new(socket);
    conn.enqueue(framed);

    let deadline = epg_core::time::timestamp_secs() + 5;
    while conn.wants_write() && !conn.is_closed() {
        if let Err(e) = conn.pump(false) {
            eprintln!("error sending shutdown request: {:?}", e);
            return EXIT_DRIVER;
        }
        if epg_core::time::timestamp_secs() > deadline {
            eprintln!("timed out sending shutdown request");
            return EXIT_DRIVER;
        }
    }

    EXIT_OK
}

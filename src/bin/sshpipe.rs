//! sshpipe - ad-hoc pipe plumbing over SSH
//!
//! Serves the local stdin/stdout to one remote SSH peer:
//!
//! ```text
//! tar cz ./photos | sshpipe --password hunter2        # here
//! ssh -T -p 2222 pipe@host | tar xz                   # there
//! ```

use clap::Parser;
use sshpipe::{HostIdentity, ServerPolicy};
use std::process;

#[derive(Parser, Debug)]
#[clap(name = "sshpipe")]
#[clap(about = "Ad-hoc pipe plumbing over SSH")]
#[clap(version)]
struct Args {
    /// Port number to listen on
    #[clap(short, long, default_value_t = 2222)]
    port: u16,

    /// Shared secret clients must present as their password
    #[clap(long, default_value = "")]
    password: String,

    /// Accept any client without credential verification
    #[clap(long)]
    wideopen: bool,

    /// Keep accepting sequential connections instead of exiting after the
    /// first session
    #[clap(short = 'k', long = "loop")]
    repeat: bool,

    /// Verbose output
    #[clap(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let policy = match ServerPolicy::from_flags(args.port, &args.password, args.wideopen, args.repeat)
    {
        Ok(policy) => policy,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Usage: pass exactly one of --wideopen or --password <secret>");
            process::exit(1);
        }
    };

    // One ephemeral key pair per process run.
    let identity = HostIdentity::generate();

    if let Err(e) = sshpipe::run(policy, identity).await {
        eprintln!("sshpipe: {}", e);
        process::exit(1);
    }
}

use std::io::stdout;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use ygit::Repo;

/// A minimal read-only Git client.
#[derive(Parser)]
#[command(name = "ygit", version, about)]
struct Cli {
    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress progress output during fetch.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Clone a remote repository into a new directory.
    Clone {
        url: String,
        dir: PathBuf,
        #[arg(long)]
        r#ref: Option<String>,
        /// Fetch full history instead of just the target commit's tree.
        #[arg(long)]
        no_shallow: bool,
        #[arg(long)]
        cone: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Fetch updates for a ref without checking them out.
    Fetch {
        #[arg(default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        r#ref: Option<String>,
        /// Fetch full history instead of just the target commit's tree.
        #[arg(long)]
        no_shallow: bool,
    },
    /// Check out a ref into the working tree.
    Checkout {
        #[arg(default_value = ".")]
        dir: PathBuf,
        r#ref: Option<String>,
    },
    /// Fetch then check out a ref.
    Pull {
        #[arg(default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        r#ref: Option<String>,
        /// Fetch full history instead of just the target commit's tree.
        #[arg(long)]
        no_shallow: bool,
    },
    /// Report which files differ from a ref's tree.
    Status {
        #[arg(default_value = ".")]
        dir: PathBuf,
        r#ref: Option<String>,
    },
    /// Print the commit history reachable from a ref.
    Log {
        #[arg(default_value = ".")]
        dir: PathBuf,
        r#ref: Option<String>,
    },
    /// List locally known branches.
    Branches {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
    /// List locally known tags.
    Tags {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ygit: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> ygit::Result<()> {
    match cli.command {
        Command::Clone {
            url,
            dir,
            r#ref,
            no_shallow,
            cone,
            username,
            password,
        } => {
            Repo::clone(
                &url,
                dir,
                r#ref.as_deref(),
                !no_shallow,
                cone.as_deref(),
                username.as_deref(),
                password.as_deref(),
                cli.quiet,
            )?;
            Ok(())
        }
        Command::Fetch { dir, r#ref, no_shallow } => {
            let mut repo = Repo::open(dir)?;
            let had_new = repo.fetch(r#ref.as_deref(), !no_shallow, cli.quiet)?;
            if had_new {
                println!("fetched new objects");
            } else {
                println!("already up to date");
            }
            Ok(())
        }
        Command::Checkout { dir, r#ref } => {
            let mut repo = Repo::open(dir)?;
            repo.checkout(r#ref.as_deref())
        }
        Command::Pull { dir, r#ref, no_shallow } => {
            let mut repo = Repo::open(dir)?;
            repo.pull(r#ref.as_deref(), !no_shallow, cli.quiet)?;
            Ok(())
        }
        Command::Status { dir, r#ref } => {
            let mut repo = Repo::open(dir)?;
            let mut out = stdout();
            repo.status(&mut out, r#ref.as_deref())?;
            Ok(())
        }
        Command::Log { dir, r#ref } => {
            let mut repo = Repo::open(dir)?;
            let mut out = stdout();
            repo.log(&mut out, r#ref.as_deref())
        }
        Command::Branches { dir } => {
            let repo = Repo::open(dir)?;
            for name in repo.branches() {
                println!("{name}");
            }
            Ok(())
        }
        Command::Tags { dir } => {
            let repo = Repo::open(dir)?;
            for name in repo.tags() {
                println!("{name}");
            }
            Ok(())
        }
    }
}

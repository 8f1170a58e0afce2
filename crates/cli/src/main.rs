//! gitpub: publish git-tracked documents to remote document stores.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use comfy_table::{presets::UTF8_BORDERS_ONLY, Cell, Table};
use console::style;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use gitpub_core::{GitRepo, RemoteConfig, TrackingBranch};

#[derive(Parser)]
#[command(
    name = "gitpub",
    version,
    about = "Publish git-tracked documents to remote document stores"
)]
struct Cli {
    /// Repository root (defaults to the current directory)
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking a remote described by a TOML definition file
    Init {
        /// Name for the new remote
        name: String,
        /// Path to the remote definition file
        config: PathBuf,
    },
    /// Stage documents for publication to a remote
    Add {
        name: String,
        /// Repository-relative document paths
        #[arg(required = true)]
        paths: Vec<String>,
        /// Publish without appearing in the remote's public listing
        #[arg(long)]
        unlisted: bool,
    },
    /// Stage removal of tracked documents (deleted remotely on next push)
    Rm {
        name: String,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Rename a document with git and keep its remote identity
    Mv {
        name: String,
        old_path: String,
        new_path: String,
    },
    /// Commit staged map changes to the tracking branch
    Commit {
        name: String,
        /// Commit message
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Merge a branch into the tracking branch and reconcile the map
    Merge {
        name: String,
        /// Branch to merge (defaults to the current branch)
        #[arg(long)]
        source: Option<String>,
        /// Reconcile the map without merging any branch
        #[arg(long)]
        update_only: bool,
    },
    /// Push pending changes to the remote
    Push { name: String },
    /// Fetch remote documents onto the tracking branch
    Fetch { name: String },
    /// Show tracked documents and staging state
    Status { name: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("cannot resolve repository root '{}'", cli.root.display()))?;
    let repo = GitRepo::open(&root)?;
    debug!(root = %root.display(), "opened repository");

    match cli.command {
        Commands::Init { name, config } => {
            let config = RemoteConfig::load(&config)?;
            let branch =
                TrackingBranch::create(repo, &name, &config.remote_type, config.repo_args_json()?)?;
            println!(
                "{} remote '{}' ({}) on branch {}",
                style("Tracking").green().bold(),
                name,
                config.remote_type,
                branch.branch_name()
            );
        }
        Commands::Add {
            name,
            paths,
            unlisted,
        } => {
            let mut branch = open(repo, &name)?;
            for path in &paths {
                branch.add(path, unlisted)?;
                println!("{} {path}", style("staged").green());
            }
            branch.save_stage()?;
        }
        Commands::Rm { name, paths } => {
            let mut branch = open(repo, &name)?;
            for path in &paths {
                branch.rm(path)?;
                println!("{} {path}", style("removed").red());
            }
            branch.save_stage()?;
        }
        Commands::Mv {
            name,
            old_path,
            new_path,
        } => {
            let mut branch = open(repo.clone(), &name)?;
            repo.mv(&old_path, &new_path)?;
            branch.record_move(&old_path, &new_path)?;
            branch.save_stage()?;
            println!("{} {old_path} -> {new_path}", style("renamed").green());
        }
        Commands::Commit { name, message } => {
            let mut branch = open(repo, &name)?;
            let message = message.unwrap_or_else(|| format!("update document map for '{name}'"));
            match branch.commit(&message, true, false)? {
                Some(id) => println!("{} {id}", style("committed").green().bold()),
                None => println!("nothing to commit, map unchanged"),
            }
            branch.save_stage()?;
        }
        Commands::Merge {
            name,
            source,
            update_only,
        } => {
            let mut branch = open(repo, &name)?;
            branch.merge(source.as_deref(), update_only)?;
            branch.save_stage()?;
            println!("{} into {}", style("merged").green().bold(), branch.branch_name());
        }
        Commands::Push { name } => {
            let mut branch = open(repo, &name)?;
            let result = branch.push();
            branch.save_stage()?;
            let outcome = result?;
            if outcome.is_noop() {
                println!("remote '{name}' already up to date");
            } else {
                println!(
                    "{} {} created, {} updated, {} deleted",
                    style("pushed").green().bold(),
                    outcome.created.len(),
                    outcome.updated.len(),
                    outcome.deleted.len()
                );
            }
        }
        Commands::Fetch { name } => {
            let mut branch = open(repo, &name)?;
            let written = branch.fetch()?;
            if written.is_empty() {
                println!("remote '{name}' already up to date");
            } else {
                for path in &written {
                    println!("{} {path}", style("imported").green());
                }
            }
        }
        Commands::Status { name } => {
            let branch = open(repo, &name)?;
            print_status(&branch, &name);
        }
    }
    Ok(())
}

fn open(repo: GitRepo, name: &str) -> Result<TrackingBranch> {
    let mut branch = TrackingBranch::open(repo, name)
        .with_context(|| format!("remote '{name}' is not tracked (run `gitpub init` first)"))?;
    branch.load_stage()?;
    Ok(branch)
}

fn print_status(branch: &TrackingBranch, name: &str) {
    let map = branch.current_map();
    if map.is_empty() {
        println!("remote '{name}': no documents tracked");
        return;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(["Path", "Remote ID", "Hash", "Unlisted"]);
    for (path, record) in map.iter() {
        let hash = record
            .content_hash
            .as_deref()
            .map(|h| h.chars().take(12).collect::<String>())
            .unwrap_or_default();
        table.add_row([
            Cell::new(path),
            Cell::new(record.remote_id.as_deref().unwrap_or("-")),
            Cell::new(hash),
            Cell::new(if record.unlisted { "yes" } else { "" }),
        ]);
    }
    println!("{table}");
    if branch.has_staged_changes() {
        println!(
            "{}",
            style("staged changes pending, run `gitpub commit`").yellow()
        );
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

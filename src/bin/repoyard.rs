use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use repoyard::{
    Engine, EngineOptions, Error, ErrorKind, GitAdapter, InMemoryCatalog, RepoRef, Signature,
    TreeNode,
};

/// File the command-line front end keeps its catalog in, under the root.
const CATALOG_FILE: &str = ".catalog.json";

/// repoyard - manage hosted git repository workspaces
#[derive(Parser, Debug)]
#[command(name = "repoyard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Storage root holding every workspace
    #[arg(long, env = "REPOYARD_ROOT", default_value = "repos", global = true)]
    root: PathBuf,

    /// Author name for commits
    #[arg(long, env = "REPOYARD_AUTHOR", global = true)]
    author: Option<String>,

    /// Author email for commits
    #[arg(long, env = "REPOYARD_EMAIL", global = true)]
    email: Option<String>,

    /// Seconds to wait for a repository lock
    #[arg(long, env = "REPOYARD_LOCK_TIMEOUT", default_value_t = 30, global = true)]
    lock_timeout: u64,

    /// Default branch of new repositories
    #[arg(long, default_value = "main", global = true)]
    default_branch: String,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty repository with an initial commit
    Create { owner: String, name: String },

    /// Fork OWNER/NAME into NEW_OWNER's namespace
    Fork {
        owner: String,
        name: String,
        new_owner: String,
    },

    /// Delete a repository and its workspace
    Delete { owner: String, name: String },

    /// Show a repository with its active branch, tree and pull-request flag
    Show { owner: String, name: String },

    /// Print the working tree, or the tree of a commit
    Tree {
        owner: String,
        name: String,
        #[arg(long)]
        commit: Option<String>,
    },

    /// Write a file and commit it
    Write {
        owner: String,
        name: String,
        path: String,
        /// Content (reads stdin when omitted)
        #[arg(long)]
        data: Option<String>,
        #[arg(short, long)]
        message: String,
    },

    /// Make the working tree match a JSON tree description and commit
    Structure {
        owner: String,
        name: String,
        /// Tree description, e.g. '{"README.txt":"blob"}' (reads stdin when omitted)
        tree: Option<String>,
        #[arg(short, long)]
        message: String,
    },

    /// Move a file or directory and commit
    Rename {
        owner: String,
        name: String,
        old: String,
        new: String,
        #[arg(short, long)]
        message: String,
    },

    /// Work with branches
    Branch {
        owner: String,
        name: String,
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Print the commit log of the active branch
    Log { owner: String, name: String },

    /// Reset the active branch to an earlier commit (destroys later commits)
    Rollback {
        owner: String,
        name: String,
        commit: String,
        #[arg(short, long, default_value = "rollback")]
        message: String,
    },

    /// Compare a fork with its source
    Diverge { owner: String, name: String },
}

#[derive(Subcommand, Debug)]
enum BranchAction {
    /// List branches
    List,
    /// Create a branch at the active head and switch to it
    Create {
        branch: String,
        #[arg(short, long, default_value = "create branch")]
        message: String,
    },
    /// Switch to a branch
    Checkout {
        branch: String,
        #[arg(short, long, default_value = "checkout")]
        message: String,
    },
    /// Rename a branch
    Rename { old: String, new: String },
    /// Delete a branch
    Delete { branch: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(exit_code(e.kind()))
        }
    }
}

fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::InvalidInput => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::AlreadyExists => 4,
        ErrorKind::Conflict => 5,
        ErrorKind::PathEscape => 6,
        ErrorKind::Busy => 7,
        ErrorKind::Cancelled => 8,
        ErrorKind::AdapterFailure => 1,
    }
}

fn options(cli: &Cli) -> EngineOptions {
    let defaults = Signature::default();
    EngineOptions {
        storage_root: cli.root.clone(),
        default_branch: cli.default_branch.clone(),
        lock_timeout: Duration::from_secs(cli.lock_timeout),
        signature: Signature {
            name: cli.author.clone().unwrap_or(defaults.name),
            email: cli.email.clone().unwrap_or(defaults.email),
        },
        ..EngineOptions::default()
    }
}

fn read_stdin() -> repoyard::Result<String> {
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

fn to_value<T: serde::Serialize>(value: &T) -> repoyard::Result<Value> {
    serde_json::to_value(value).map_err(Error::git)
}

fn format_time(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

fn run(cli: Cli) -> repoyard::Result<Value> {
    let options = options(&cli);
    std::fs::create_dir_all(&options.storage_root)
        .map_err(|e| Error::io(&options.storage_root, e))?;
    let catalog_path = options.storage_root.join(CATALOG_FILE);
    let catalog = Arc::new(InMemoryCatalog::load(&catalog_path)?);
    let engine: Engine<GitAdapter> =
        Engine::with_parts(options, GitAdapter::new(), catalog.clone())?;

    let (value, mutated) = dispatch(&engine, cli.command)?;
    if mutated {
        catalog.save(&catalog_path)?;
    }
    Ok(value)
}

/// Run one command; the flag says whether the catalog may have changed.
fn dispatch(engine: &Engine, command: Command) -> repoyard::Result<(Value, bool)> {
    match command {
        Command::Create { owner, name } => {
            let ws = engine.create_repository(&owner, &name)?;
            Ok((to_value(ws.repository())?, true))
        }
        Command::Fork {
            owner,
            name,
            new_owner,
        } => {
            let ws = engine.fork_repository(&RepoRef::new(owner, name), &new_owner)?;
            Ok((to_value(ws.repository())?, true))
        }
        Command::Delete { owner, name } => {
            engine.delete_repository(&RepoRef::new(owner.clone(), name.clone()))?;
            Ok((json!({ "deleted": format!("{}/{}", owner, name) }), true))
        }
        Command::Show { owner, name } => {
            let detail = engine.retrieve(&RepoRef::new(owner, name))?;
            Ok((to_value(&detail)?, false))
        }
        Command::Tree {
            owner,
            name,
            commit,
        } => {
            let ws = engine.workspace(&owner, &name)?;
            Ok((to_value(&ws.tree(commit.as_deref())?)?, false))
        }
        Command::Write {
            owner,
            name,
            path,
            data,
            message,
        } => {
            let ws = engine.workspace(&owner, &name)?;
            let data = match data {
                Some(data) => data,
                None => read_stdin()?,
            };
            let commit = ws.update_file(&path, data.as_bytes(), &message)?;
            Ok((json!({ "commit": commit }), false))
        }
        Command::Structure {
            owner,
            name,
            tree,
            message,
        } => {
            let ws = engine.workspace(&owner, &name)?;
            let tree = match tree {
                Some(tree) => tree,
                None => read_stdin()?,
            };
            let desired = TreeNode::from_json(&tree)?;
            let commit = ws.update_structure(&desired, &message)?;
            Ok((json!({ "commit": commit }), false))
        }
        Command::Rename {
            owner,
            name,
            old,
            new,
            message,
        } => {
            let ws = engine.workspace(&owner, &name)?;
            let commit = ws.rename_entry(&old, &new, &message)?;
            Ok((json!({ "commit": commit }), false))
        }
        Command::Branch {
            owner,
            name,
            action,
        } => {
            let ws = engine.workspace(&owner, &name)?;
            let branches = ws.branches();
            match action {
                BranchAction::List => Ok((
                    json!({ "active": branches.active()?, "branches": branches.list()? }),
                    false,
                )),
                BranchAction::Create { branch, message } => {
                    let head = branches.create(&branch, &message)?;
                    Ok((json!({ "branch": branch, "head": head }), false))
                }
                BranchAction::Checkout { branch, message } => {
                    branches.checkout(&branch, &message)?;
                    Ok((json!({ "active": branch }), false))
                }
                BranchAction::Rename { old, new } => {
                    branches.rename(&old, &new)?;
                    Ok((json!({ "renamed": old, "to": new }), true))
                }
                BranchAction::Delete { branch } => {
                    branches.delete(&branch)?;
                    Ok((json!({ "deleted": branch }), false))
                }
            }
        }
        Command::Log { owner, name } => {
            let ws = engine.workspace(&owner, &name)?;
            let entries: Vec<Value> = ws
                .history()
                .log()?
                .into_iter()
                .map(|c| {
                    json!({
                        "commit_hash": c.commit_hash,
                        "message": c.message,
                        "author_name": c.author_name,
                        "author_email": c.author_email,
                        "time": format_time(c.time),
                        "parents": c.parents,
                    })
                })
                .collect();
            Ok((Value::Array(entries), false))
        }
        Command::Rollback {
            owner,
            name,
            commit,
            message,
        } => {
            let ws = engine.workspace(&owner, &name)?;
            let head = ws.history().rollback(&commit, &message)?;
            Ok((json!({ "head": head }), false))
        }
        Command::Diverge { owner, name } => {
            let ws = engine.workspace(&owner, &name)?;
            Ok((to_value(&ws.divergence()?)?, false))
        }
    }
}

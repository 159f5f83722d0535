//! strata CLI - versioned document repository command line interface

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use strata::{Direction, IterStart, Node, NodeKind, Repository};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "hierarchical versioned document repository")]
#[command(version)]
struct Cli {
    /// repository path
    #[arg(short, long, default_value = ".", env = "STRATA_REPO")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// initialize a new repository
    Init {
        /// path to create repository at
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// create a collection
    Mkdir {
        /// node path
        path: String,

        /// create missing parent collections
        #[arg(short, long)]
        parents: bool,
    },

    /// write stdin or a file into a resource, creating it if needed
    Put {
        /// node path
        path: String,

        /// read content from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// print a node's content
    Cat {
        /// node path
        path: String,

        /// print this revision instead of the live content
        #[arg(short, long)]
        revision: Option<String>,
    },

    /// list a collection's children
    Ls {
        /// node path
        #[arg(default_value = "/")]
        path: String,
    },

    /// show or set properties
    Props {
        /// node path
        path: String,

        /// set a string property (name=value)
        #[arg(short, long)]
        set: Vec<String>,

        /// remove a property
        #[arg(short, long)]
        remove: Vec<String>,
    },

    /// check out a resource for editing
    Checkout {
        /// node path
        path: String,

        /// user id
        #[arg(short, long, env = "USER")]
        user: String,
    },

    /// check in a resource, creating a revision
    Checkin {
        /// node path
        path: String,

        /// revision comment
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// cancel a checkout without creating a revision
    Cancel {
        /// node path
        path: String,
    },

    /// show revision history
    Log {
        /// node path
        path: String,

        /// maximum number of revisions to show
        #[arg(short = 'n', long)]
        max_count: Option<usize>,

        /// oldest first
        #[arg(long)]
        reverse: bool,
    },

    /// show the revision current at a point in time
    At {
        /// node path
        path: String,

        /// RFC 3339 date, e.g. 2024-01-02T03:04:05Z
        date: DateTime<Utc>,
    },

    /// restore a revision's content and properties
    Restore {
        /// node path
        path: String,

        /// revision name
        revision: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("STRATA_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run(cli: Cli) -> strata::Result<()> {
    match cli.command {
        Commands::Init { path } => {
            Repository::init(&path)?;
            println!("initialized strata repository at {}", path.display());
        }

        Commands::Mkdir { path, parents } => {
            let repo = Repository::open(&cli.repo)?;
            let node = if parents {
                ensure_collection(&repo, &path)?
            } else {
                let (parent, name) = split_parent(&path)?;
                repo.get_node(parent)?.add_node(name, NodeKind::Collection)?
            };
            println!("created {}", node.path());
        }

        Commands::Put { path, file } => {
            let repo = Repository::open(&cli.repo)?;
            let content = match &file {
                Some(file) => std::fs::read(file).map_err(|e| io_error(file.clone(), e))?,
                None => {
                    let mut buf = Vec::new();
                    io::stdin()
                        .read_to_end(&mut buf)
                        .map_err(|e| io_error("stdin".into(), e))?;
                    buf
                }
            };
            let node = if repo.exists(&path) {
                repo.get_node(&path)?
            } else {
                let (parent, name) = split_parent(&path)?;
                ensure_collection(&repo, parent)?.add_node(name, NodeKind::Resource)?
            };
            node.write_content(&content)?;
            println!("wrote {} bytes to {}", content.len(), node.path());
        }

        Commands::Cat { path, revision } => {
            let repo = Repository::open(&cli.repo)?;
            let node = repo.get_node(&path)?;
            let content = match revision {
                Some(name) => node.revision(&name)?.content()?,
                None => node.content()?,
            };
            io::stdout()
                .write_all(&content)
                .map_err(|e| io_error("stdout".into(), e))?;
        }

        Commands::Ls { path } => {
            let repo = Repository::open(&cli.repo)?;
            for child in repo.get_node(&path)?.children()? {
                let marker = match child.kind()? {
                    NodeKind::Collection => "/",
                    NodeKind::Resource => "",
                };
                println!("{}{}", child.name(), marker);
            }
        }

        Commands::Props { path, set, remove } => {
            let repo = Repository::open(&cli.repo)?;
            let node = repo.get_node(&path)?;
            for assignment in &set {
                let (name, value) = assignment.split_once('=').ok_or_else(|| {
                    strata::Error::InvalidName(format!("expected name=value: {}", assignment))
                })?;
                node.set_property(name, value)?;
            }
            for name in &remove {
                node.remove_property(name)?;
            }
            for property in node.properties()?.values() {
                println!(
                    "{}<{}>: {}",
                    property.name,
                    property.property_type().as_str(),
                    property.value
                );
            }
        }

        Commands::Checkout { path, user } => {
            let repo = Repository::open(&cli.repo)?;
            repo.get_node(&path)?.checkout(&user)?;
            println!("checked out {} as {}", path, user);
        }

        Commands::Checkin { path, message } => {
            let repo = Repository::open(&cli.repo)?;
            let revision = repo.get_node(&path)?.checkin(&message)?;
            println!("{}", revision.name());
        }

        Commands::Cancel { path } => {
            let repo = Repository::open(&cli.repo)?;
            repo.get_node(&path)?.cancel_checkout()?;
            println!("cancelled checkout of {}", path);
        }

        Commands::Log {
            path,
            max_count,
            reverse,
        } => {
            let repo = Repository::open(&cli.repo)?;
            let node = repo.get_node(&path)?;
            let (start, direction) = if reverse {
                (IterStart::Oldest, Direction::Forward)
            } else {
                (IterStart::MostRecent, Direction::Backward)
            };
            let revisions = node
                .revision_iter(start, direction)?
                .take(max_count.unwrap_or(usize::MAX));
            for revision in revisions {
                let revision = revision?;
                println!(
                    "{} {} {} {}",
                    revision.name(),
                    revision.creation_date()?.to_rfc3339(),
                    revision.creator()?.unwrap_or_default(),
                    revision.comment()?.unwrap_or_default()
                );
            }
        }

        Commands::At { path, date } => {
            let repo = Repository::open(&cli.repo)?;
            match repo.get_node(&path)?.revision_at(date)? {
                Some(revision) => println!("{}", revision.name()),
                None => println!("no revision of {} at {}", path, date.to_rfc3339()),
            }
        }

        Commands::Restore { path, revision } => {
            let repo = Repository::open(&cli.repo)?;
            repo.get_node(&path)?.restore(&revision)?;
            println!("restored {} to {}", path, revision);
        }
    }

    Ok(())
}

/// parent path and last segment of a node path
fn split_parent(path: &str) -> strata::Result<(&str, &str)> {
    let path = path.strip_suffix('/').unwrap_or(path);
    match path.rfind('/') {
        Some(0) => Ok(("/", &path[1..])),
        Some(i) => Ok((&path[..i], &path[i + 1..])),
        None => Err(strata::Error::InvalidPath(format!(
            "path must be absolute: {}",
            path
        ))),
    }
}

/// the collection at `path`, creating missing ancestors
fn ensure_collection(repo: &Repository, path: &str) -> strata::Result<Node> {
    let path = strata::normalize_path(path)?;
    let mut node = repo.root_node()?;
    for name in path.split('/').filter(|s| !s.is_empty()) {
        node = if node.has_child(name) {
            node.child(name)?
        } else {
            node.add_node(name, NodeKind::Collection)?
        };
    }
    Ok(node)
}

fn io_error(path: PathBuf, source: io::Error) -> strata::Error {
    strata::Error::Io { path, source }
}

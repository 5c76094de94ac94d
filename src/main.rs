use clap::{Parser, Subcommand};

use docsmith::config::Config;
use docsmith::domain::{AccessMaterial, RefKind, Repository, TrackedTarget, Trigger};
use docsmith::store::{JobStore, RepositoryStore, TargetStore};
use docsmith::Runtime;

#[derive(Parser)]
#[command(name = "docsmithd")]
#[command(about = "docsmith — control plane for Git-hosted documentation builds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage registered repositories
    Repo {
        #[command(subcommand)]
        cmd: RepoCommands,
    },
    /// Manage tracked targets (branches/tags) of a repository
    Target {
        #[command(subcommand)]
        cmd: TargetCommands,
    },
    /// Enqueue, list, and cancel build jobs
    Build {
        #[command(subcommand)]
        cmd: BuildCommands,
    },
    /// Start the worker pool and auto-build monitor; runs until interrupted
    Run,
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Register a repository
    Add {
        #[arg(long)]
        display_name: String,
        #[arg(long)]
        provider_tag: String,
        #[arg(long)]
        clone_url: String,
        #[arg(long, default_value = "docs")]
        docs_subpath: String,
        #[arg(long)]
        https_token: Option<String>,
        #[arg(long)]
        no_verify_tls: bool,
        #[arg(long)]
        private: bool,
    },
    /// List registered repositories
    List,
    /// Remove a repository, cascading to its targets, builds, and artifacts
    Remove {
        id: docsmith::domain::RepoId,
    },
}

#[derive(Subcommand)]
enum TargetCommands {
    /// Track a branch or tag of a repository
    Add {
        repo_id: docsmith::domain::RepoId,
        #[arg(long, value_enum)]
        ref_kind: RefKindArg,
        #[arg(long)]
        ref_name: String,
        #[arg(long)]
        auto_build: bool,
    },
    /// List targets of a repository
    List {
        repo_id: docsmith::domain::RepoId,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum RefKindArg {
    Branch,
    Tag,
}

impl From<RefKindArg> for RefKind {
    fn from(value: RefKindArg) -> Self {
        match value {
            RefKindArg::Branch => RefKind::Branch,
            RefKindArg::Tag => RefKind::Tag,
        }
    }
}

#[derive(Subcommand)]
enum BuildCommands {
    /// Enqueue a manual build for a target
    Enqueue {
        target_id: docsmith::domain::TargetId,
    },
    /// List recent builds for a target
    List {
        target_id: docsmith::domain::TargetId,
    },
    /// Cancel a queued build
    Cancel {
        build_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    docsmith::logging::init();
    let cli = Cli::parse();
    let config = Config::from_env();
    let runtime = Runtime::bootstrap(config)?;

    match cli.command {
        Commands::Repo { cmd } => handle_repo(&runtime, cmd).await?,
        Commands::Target { cmd } => handle_target(&runtime, cmd).await?,
        Commands::Build { cmd } => handle_build(&runtime, cmd).await?,
        Commands::Run => {
            runtime.run().await?;
            tracing::info!("docsmithd running; press ctrl-c to stop");
            let (tx, rx) = tokio::sync::oneshot::channel();
            let mut tx = Some(tx);
            ctrlc::set_handler(move || {
                if let Some(tx) = tx.take() {
                    let _ = tx.send(());
                }
            })?;
            let _ = rx.await;
            tracing::info!("shutting down");
        }
    }

    Ok(())
}

async fn handle_repo(runtime: &Runtime, cmd: RepoCommands) -> anyhow::Result<()> {
    match cmd {
        RepoCommands::Add {
            display_name,
            provider_tag,
            clone_url,
            docs_subpath,
            https_token,
            no_verify_tls,
            private,
        } => {
            let access_material = match https_token {
                Some(token) => AccessMaterial::HttpsToken { token },
                None => AccessMaterial::None,
            };
            let repo = Repository {
                id: 0,
                display_name,
                provider_tag,
                clone_url,
                docs_subpath,
                access_material,
                verify_tls: !no_verify_tls,
                public: !private,
                main_target_id: None,
                metadata: None,
            };
            let inserted = RepositoryStore::insert_repository(&runtime.store, &repo).await?;
            println!("registered repository {}", inserted.id);
        }
        RepoCommands::List => {
            for repo in RepositoryStore::list(&runtime.store).await? {
                println!("{}\t{}\t{}", repo.id, repo.display_name, repo.clone_url);
            }
        }
        RepoCommands::Remove { id } => {
            RepositoryStore::remove(&runtime.store, id).await?;
            runtime.paths.purge_repository(id).await?;
            println!("removed repository {id}");
        }
    }
    Ok(())
}

async fn handle_target(runtime: &Runtime, cmd: TargetCommands) -> anyhow::Result<()> {
    match cmd {
        TargetCommands::Add { repo_id, ref_kind, ref_name, auto_build } => {
            let target = TrackedTarget {
                id: 0,
                repo_id,
                ref_kind: ref_kind.into(),
                ref_name,
                auto_build,
                env_manager_override: None,
                last_built_commit: None,
                latest_successful_build_id: None,
            };
            let inserted = TargetStore::insert_target(&runtime.store, &target).await?;
            println!("tracking target {} ({})", inserted.id, inserted.slug());
        }
        TargetCommands::List { repo_id } => {
            for target in TargetStore::list_for_repo(&runtime.store, repo_id).await? {
                println!("{}\t{}\tauto_build={}", target.id, target.slug(), target.auto_build);
            }
        }
    }
    Ok(())
}

async fn handle_build(runtime: &Runtime, cmd: BuildCommands) -> anyhow::Result<()> {
    match cmd {
        BuildCommands::Enqueue { target_id } => {
            let job = runtime.queue.enqueue(target_id, Trigger::Manual).await?;
            println!("enqueued build {}", job.id);
        }
        BuildCommands::List { target_id } => {
            for job in JobStore::list_for_target(&runtime.store, target_id).await? {
                println!("{}\t{}\t{}", job.id, job.status, job.trigger);
            }
        }
        BuildCommands::Cancel { build_id } => {
            let id = docsmith::domain::BuildId::parse_str(&build_id)?;
            if runtime.queue.cancel_queued(id).await? {
                println!("cancelled build {id}");
            } else {
                println!("build {id} was not queued (already running or terminal)");
            }
        }
    }
    Ok(())
}

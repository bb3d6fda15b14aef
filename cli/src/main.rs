use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use git_http::{HostedRepository, RepositoryError, RepositorySettings};
use gitgud_server::config::{AppEnv, loader};
use gitgud_server::telemetry;

#[derive(Parser)]
#[command(name = "gitgud")]
#[command(about = "gitgud CLI - Manage hosted repositories on local storage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(subcommand)]
    Repo(RepoCommands),
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Create a new bare repository
    Create {
        /// Organisation owning the repository
        org: String,
        /// Repository name, without the .git suffix
        name: String,
        /// Initial branch (defaults to the configured default branch)
        #[arg(short, long)]
        branch: Option<String>,
    },
    /// Delete a bare repository
    Delete { org: String, name: String },
    /// List the files tracked on a branch
    Files {
        org: String,
        name: String,
        #[arg(short, long)]
        branch: Option<String>,
    },
    /// Clone a hosted repository into the clones directory
    Clone {
        org: String,
        name: String,
        /// Directory name under <clones_root>/<org>
        destination: String,
    },
    /// Show the checked-out branch of a clone
    Branch {
        org: String,
        name: String,
        /// Directory name under <clones_root>/<org>
        destination: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing(AppEnv::from_process_env());

    let cli = Cli::parse();
    let config = loader::load_with_discovery()?;
    let settings = config.repository_settings();

    match cli.command {
        Commands::Repo(repo_cmd) => match repo_cmd {
            RepoCommands::Create { org, name, branch } => {
                create_repository(&settings, &org, &name, branch).await?
            }
            RepoCommands::Delete { org, name } => delete_repository(&settings, &org, &name).await?,
            RepoCommands::Files { org, name, branch } => {
                list_files(&settings, &org, &name, branch).await?
            }
            RepoCommands::Clone {
                org,
                name,
                destination,
            } => clone_repository(&settings, &org, &name, &destination).await?,
            RepoCommands::Branch {
                org,
                name,
                destination,
            } => show_branch(&settings, &org, &name, &destination).await?,
        },
    }

    Ok(())
}

async fn create_repository(
    settings: &RepositorySettings,
    org: &str,
    name: &str,
    branch: Option<String>,
) -> Result<()> {
    let mut repo = HostedRepository::new(settings, org, name)?;
    if let Some(branch) = branch {
        repo = repo.with_default_branch(branch);
    }
    repo.create_bare()
        .await
        .with_context(|| format!("Failed to create {}", repo.full_name()))?;

    println!("✓ Repository created successfully!");
    println!("  Name:   {}", repo.full_name());
    println!("  Path:   {}", repo.full_path().display());
    println!("  URL:    {}", repo.clone_url());
    println!("  Branch: {}", repo.default_branch());

    Ok(())
}

async fn delete_repository(settings: &RepositorySettings, org: &str, name: &str) -> Result<()> {
    let repo = HostedRepository::new(settings, org, name)?;
    repo.delete()
        .await
        .with_context(|| format!("Failed to delete {}", repo.full_name()))?;

    println!("✓ Repository {} deleted", repo.full_name());
    Ok(())
}

async fn list_files(
    settings: &RepositorySettings,
    org: &str,
    name: &str,
    branch: Option<String>,
) -> Result<()> {
    let repo = HostedRepository::new(settings, org, name)?;
    if !repo.exists() {
        anyhow::bail!("Repository {} does not exist", repo.full_name());
    }
    let branch = branch.unwrap_or_else(|| repo.default_branch().to_string());

    match repo.files(&branch).await {
        Ok(files) => {
            for file in files {
                println!("{}", file.name);
            }
        }
        Err(RepositoryError::Empty(empty)) => println!("(no files: {empty})"),
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to list {}", repo.full_name()));
        }
    }

    Ok(())
}

async fn clone_repository(
    settings: &RepositorySettings,
    org: &str,
    name: &str,
    destination: &str,
) -> Result<()> {
    let repo = HostedRepository::new(settings, org, name)?;
    let clone = repo
        .clone_to(destination)
        .await
        .with_context(|| format!("Failed to clone {}", repo.clone_url()))?;
    let branch = clone.branch().await?;

    println!("✓ Repository cloned successfully!");
    println!("  Path:   {}", clone.full_path().display());
    println!("  Branch: {branch}");

    Ok(())
}

async fn show_branch(
    settings: &RepositorySettings,
    org: &str,
    name: &str,
    destination: &str,
) -> Result<()> {
    let repo = HostedRepository::new(settings, org, name)?;
    let clone = repo.working_copy(destination)?;
    if !clone.full_path().is_dir() {
        anyhow::bail!("No clone at {}", clone.full_path().display());
    }
    let branch = clone
        .branch()
        .await
        .with_context(|| format!("Failed to read branch of {}", clone.full_path().display()))?;

    println!("{branch}");
    Ok(())
}

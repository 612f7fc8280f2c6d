use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use gitabase_manager::catalog::{CatalogManifest, CatalogScanner};
use gitabase_manager::domain::GitabaseId;
use gitabase_manager::error::{ErrorKind, GitabaseError};
use gitabase_manager::fetch::{CancelToken, HttpFetcher};
use gitabase_manager::library::Library;
use gitabase_manager::output::{JsonOutput, StderrProgress};
use gitabase_manager::pipeline::ImportPipeline;
use gitabase_manager::store::Store;

#[derive(Parser)]
#[command(name = "gitabase")]
#[command(about = "Manage the local gitabase library: import archives, list and inspect the catalog")]
#[command(version, author)]
struct Cli {
    /// Catalog folder override; defaults to the platform data directory.
    #[arg(long, global = true)]
    catalog_dir: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download a gitabase archive and import it into the catalog")]
    Install(InstallArgs),
    #[command(about = "Scan the catalog folder and list every gitabase")]
    List,
    #[command(about = "Show one catalog entry")]
    Info(InfoArgs),
    #[command(about = "Open a gitabase and print its books, chapters or verses")]
    Read(ReadArgs),
    #[command(about = "Delete a gitabase from the catalog")]
    Remove(InfoArgs),
}

#[derive(Args)]
struct InstallArgs {
    url: String,
}

#[derive(Args)]
struct InfoArgs {
    id: String,
}

#[derive(Args)]
struct ReadArgs {
    /// Gitabase to open; defaults to the last one read.
    id: Option<String>,

    /// List the chapters of one book instead of the book list.
    #[arg(long)]
    book: Option<i64>,

    /// Print the verses of one chapter.
    #[arg(long)]
    chapter: Option<i64>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<GitabaseError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GitabaseError) -> u8 {
    match error.kind() {
        ErrorKind::NotFound | ErrorKind::InvalidIdentifier => 2,
        ErrorKind::Http | ErrorKind::Cancelled => 3,
        ErrorKind::Archive | ErrorKind::EmptyImport => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = match cli.catalog_dir {
        Some(root) => Store::new_with_root(root),
        None => Store::new().into_diagnostic()?,
    };
    store.ensure_catalog_root().into_diagnostic()?;

    match cli.command {
        Commands::Install(args) => run_install(args, &store),
        Commands::List => run_list(&store),
        Commands::Info(args) => run_info(args, &store),
        Commands::Read(args) => run_read(args, &store),
        Commands::Remove(args) => run_remove(args, &store),
    }
}

fn run_install(args: InstallArgs, store: &Store) -> miette::Result<()> {
    let fetcher = HttpFetcher::new().into_diagnostic()?;
    let pipeline = ImportPipeline::new(fetcher);
    let sink = StderrProgress::new();
    let cancel = CancelToken::new();

    let report = pipeline
        .run(&args.url, store.catalog_root(), &sink, &cancel)
        .into_diagnostic()?;
    CatalogManifest::from_entries(report.catalog.clone())
        .write(store)
        .into_diagnostic()?;
    JsonOutput::print(&report.imported).into_diagnostic()?;
    Ok(())
}

fn run_list(store: &Store) -> miette::Result<()> {
    let entries = CatalogScanner::new()
        .scan(store.catalog_root())
        .into_diagnostic()?;
    CatalogManifest::from_entries(entries.clone())
        .write(store)
        .into_diagnostic()?;
    JsonOutput::print(&entries).into_diagnostic()?;
    Ok(())
}

fn run_info(args: InfoArgs, store: &Store) -> miette::Result<()> {
    let id: GitabaseId = args.id.parse().into_diagnostic()?;
    let entries = CatalogScanner::new()
        .scan(store.catalog_root())
        .into_diagnostic()?;
    let entry = entries
        .into_iter()
        .find(|entry| entry.id == id)
        .ok_or_else(|| GitabaseError::UnknownGitabase(id.to_string()))
        .into_diagnostic()?;
    JsonOutput::print(&entry).into_diagnostic()?;
    Ok(())
}

fn run_read(args: ReadArgs, store: &Store) -> miette::Result<()> {
    let library = Library::open(store.clone()).into_diagnostic()?;
    let id: GitabaseId = match args.id {
        Some(raw) => raw.parse().into_diagnostic()?,
        None => library
            .last_opened()
            .into_diagnostic()?
            .ok_or_else(|| GitabaseError::UnknownGitabase("no gitabase opened yet".to_string()))
            .into_diagnostic()?,
    };

    match (args.chapter, args.book) {
        (Some(chapter_id), _) => {
            JsonOutput::print(&library.verses(&id, chapter_id).into_diagnostic()?)
                .into_diagnostic()?;
        }
        (None, Some(book_id)) => {
            JsonOutput::print(&library.chapters(&id, book_id).into_diagnostic()?)
                .into_diagnostic()?;
        }
        (None, None) => {
            JsonOutput::print(&library.books(&id).into_diagnostic()?).into_diagnostic()?;
        }
    }
    library.close();
    Ok(())
}

fn run_remove(args: InfoArgs, store: &Store) -> miette::Result<()> {
    let id: GitabaseId = args.id.parse().into_diagnostic()?;
    let removed = store.remove_gitabase(&id).into_diagnostic()?;
    if !removed {
        return Err(GitabaseError::UnknownGitabase(id.to_string())).into_diagnostic();
    }
    let entries = CatalogScanner::new()
        .scan(store.catalog_root())
        .into_diagnostic()?;
    CatalogManifest::from_entries(entries)
        .write(store)
        .into_diagnostic()?;
    JsonOutput::print(&serde_json::json!({ "removed": id.to_string() })).into_diagnostic()?;
    Ok(())
}

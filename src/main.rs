use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::rc::Rc;

use techdocs::config::{ConfigError, ConfigLoader, ProjectRegistry};
use techdocs::copier::{Copier, Executor, OperationExecutor, PrintingExecutor, RelativeFormatter};
use techdocs::detectors::{
    CopyDetector, DeleteDetector, FilterDetector, OpenApiDetector, OperationDetectorChain,
    PlantUmlDetector,
};
use techdocs::filesystem::RealFilesystem;
use techdocs::index::FileIndexLoader;
use techdocs::paths::absolute;
use techdocs::render::{DockerPlantUmlRenderer, RedoclyBundler};

#[derive(Debug, Parser)]
#[command(name = "techdocs")]
#[command(version)]
#[command(about = "Copies documentation from product repositories into the tech-docs tree, based on a configuration file")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Synchronize documentation into the destination tree
    Copy(CopyArgs),
}

#[derive(Debug, Args)]
struct CopyArgs {
    /// Repository label recorded in the index; scopes stale-file deletion
    #[arg(long = "index", value_name = "REPO")]
    index: String,

    /// Source repository root
    #[arg(long = "from", value_name = "DIR")]
    from_path: PathBuf,

    /// Destination documentation tree (must contain projects.json)
    #[arg(long = "to", value_name = "DIR")]
    to_path: PathBuf,

    /// JSON configuration file
    #[arg(long = "config", value_name = "FILE")]
    config_path: PathBuf,

    /// Branch name used in generated edit URLs
    #[arg(long, default_value = "master")]
    branch: String,

    /// Author recorded in the last_update frontmatter attribute
    #[arg(long, default_value = "unknown author")]
    author: String,

    /// Print planned operations; mutate nothing, persist no index
    #[arg(long)]
    dry_run: bool,

    /// Drop invalid document entries with a warning instead of failing
    #[arg(long)]
    skip_invalid_documents: bool,
}

fn main() {
    let cli = Cli::parse();
    let result = match cli.cmd {
        Command::Copy(args) => run_copy(&args),
    };
    if let Err(err) = result {
        if let Some(config_err) = err.downcast_ref::<ConfigError>() {
            println!("Config file load error: {config_err}");
            std::process::exit(1);
        }
        eprintln!("Error: {err:#}");
        std::process::exit(2);
    }
}

fn run_copy(args: &CopyArgs) -> Result<()> {
    let fs = RealFilesystem;
    let from_path = absolute(&args.from_path);
    let to_path = absolute(&args.to_path);

    let registry = ProjectRegistry::new(&to_path);
    let config = ConfigLoader::new(&from_path, &registry, &fs)
        .load(&args.config_path, args.skip_invalid_documents)?;
    techdocs::debug_log!("[techdocs] {} document rule(s) loaded", config.documents.len());

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner.set_message("detecting operations...");

    FileIndexLoader::loaded(&to_path.join(".index"), &fs, !args.dry_run, |index| {
        let mut chain = OperationDetectorChain::new(vec![
            Box::new(CopyDetector::new(
                &from_path,
                &to_path,
                &args.author,
                &args.branch,
                config,
                &registry,
            )?),
            Box::new(PlantUmlDetector::new(Rc::new(DockerPlantUmlRenderer::new()))),
            Box::new(OpenApiDetector::new(Rc::new(RedoclyBundler))),
            Box::new(DeleteDetector::new(&args.index, index, &to_path)),
            Box::new(FilterDetector),
        ]);
        let operations = chain.operations(&fs)?;
        spinner.finish_with_message(format!("{} operation(s) detected", operations.len()));

        let formatter = RelativeFormatter::new(vec![from_path.clone(), to_path.clone()]);
        let executor: Box<dyn OperationExecutor + '_> = if args.dry_run {
            Box::new(PrintingExecutor::new(Box::new(formatter)))
        } else {
            Box::new(Executor::new(&fs, Box::new(formatter)))
        };
        Copier::new(executor.as_ref()).run(&operations)
    })
}

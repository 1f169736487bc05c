use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod build;
mod config;
mod nav;

#[derive(Parser)]
#[command(
    name = "mkdocs-tex",
    version,
    about = "Convert an MkDocs material site into LaTeX chapter files"
)]
struct Cli {
    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert every chapter and write the changed chapter files
    Build {
        /// Project root holding mkdocs-tex.json and the MkDocs project
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Config file to use instead of <root>/mkdocs-tex.json
        #[arg(long)]
        config: Option<PathBuf>,

        /// Show what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Show detailed output including unchanged files
        #[arg(long)]
        verbose: bool,

        /// Rebuild whenever a page or mkdocs.yml changes
        #[arg(long)]
        watch: bool,
    },

    /// Convert one markdown page and print the LaTeX
    Convert {
        /// Path to the .md file
        file: PathBuf,

        /// Project root holding mkdocs-tex.json and the MkDocs project
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Config file to use instead of <root>/mkdocs-tex.json
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the cross-reference label a heading gets
    Slug {
        /// Heading text
        text: String,
    },
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            root,
            config,
            dry_run,
            verbose,
            watch,
        } => {
            init_logging(verbose, cli.quiet);
            let opts = build::BuildOpts {
                root,
                config,
                dry_run,
                verbose,
                quiet: cli.quiet,
            };
            if watch {
                build::watch_and_rebuild(&opts)?;
            } else {
                let report = build::run_build(&opts)?;
                if !cli.quiet {
                    report.print_summary();
                }
            }
        }
        Commands::Convert { file, root, config } => {
            init_logging(false, cli.quiet);
            let tex = build::convert_file(&file, &root, config.as_deref())?;
            print!("{tex}");
        }
        Commands::Slug { text } => {
            println!("{}", mdtex_core::slugify(&text));
        }
    }

    Ok(())
}

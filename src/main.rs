use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use arbor::cli::commands::{self, ExecuteOptions, SelectionOptions};

#[derive(Parser)]
#[command(name = "arbor", about = "Hierarchical test discovery and execution", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve selectors against catalogs and print the test plan
    Discover {
        #[command(flatten)]
        selection: Selection,

        /// Output format: yaml, json, tree
        #[arg(long, default_value = "yaml")]
        format: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Discover and run tests
    Execute {
        #[command(flatten)]
        selection: Selection,

        /// Worker threads (1 = sequential)
        #[arg(long, default_value_t = 1)]
        parallelism: usize,

        /// Per-node timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Stop after the first failed test
        #[arg(long)]
        fail_fast: bool,

        /// Report tests carrying this tag as skipped (repeatable)
        #[arg(long = "skip-tag")]
        skip_tags: Vec<String>,

        /// Emit a run report: yaml, json
        #[arg(long)]
        report: Option<String>,

        /// Report file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct Selection {
    /// Catalog files (.yaml)
    catalogs: Vec<PathBuf>,

    /// Select a package by name (repeatable)
    #[arg(long = "select-package")]
    packages: Vec<String>,

    /// Select a class, e.g. pkg.Outer$Inner (repeatable)
    #[arg(long = "select-class")]
    classes: Vec<String>,

    /// Select a method, e.g. pkg.Class#method (repeatable)
    #[arg(long = "select-method")]
    methods: Vec<String>,

    /// Select packages declared under a path (repeatable)
    #[arg(long = "select-path")]
    paths: Vec<PathBuf>,

    /// Select a node by unique id (repeatable)
    #[arg(long = "select-id")]
    ids: Vec<String>,

    /// Keep only classes matching this pattern (repeatable)
    #[arg(long = "include-class")]
    include_classes: Vec<String>,

    /// Drop classes matching this pattern (repeatable)
    #[arg(long = "exclude-class")]
    exclude_classes: Vec<String>,

    /// Keep only packages matching this pattern (repeatable)
    #[arg(long = "include-package")]
    include_packages: Vec<String>,

    /// Drop packages matching this pattern (repeatable)
    #[arg(long = "exclude-package")]
    exclude_packages: Vec<String>,

    /// Tag expression, e.g. "smoke AND NOT slow"
    #[arg(long)]
    tags: Option<String>,

    /// Only use these engines (repeatable)
    #[arg(long = "include-engine")]
    include_engines: Vec<String>,

    /// Ignore these engines (repeatable)
    #[arg(long = "exclude-engine")]
    exclude_engines: Vec<String>,

    /// Keep selected containers even when filtering empties them
    #[arg(long)]
    retain_selected: bool,
}

impl From<Selection> for SelectionOptions {
    fn from(s: Selection) -> Self {
        Self {
            catalogs: s.catalogs,
            packages: s.packages,
            classes: s.classes,
            methods: s.methods,
            paths: s.paths,
            ids: s.ids,
            include_classes: s.include_classes,
            exclude_classes: s.exclude_classes,
            include_packages: s.include_packages,
            exclude_packages: s.exclude_packages,
            tags: s.tags,
            include_engines: s.include_engines,
            exclude_engines: s.exclude_engines,
            retain_selected: s.retain_selected,
        }
    }
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Discover {
            selection,
            format,
            output,
        }) => match commands::run_discover(&selection.into(), &format, output.as_ref()) {
            Ok(result) => print!("{result}"),
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
        Some(Commands::Execute {
            selection,
            parallelism,
            timeout_ms,
            fail_fast,
            skip_tags,
            report,
            output,
        }) => {
            let options = ExecuteOptions {
                selection: selection.into(),
                parallelism,
                timeout_ms,
                fail_fast,
                skip_tags,
                report,
                output,
                progress: true,
            };
            match commands::run_execute(&options) {
                Ok(outcome) => {
                    print!("{}", outcome.output);
                    std::process::exit(outcome.summary.exit_code());
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            // No subcommand: print help
            Cli::parse_from(["arbor", "--help"]);
        }
    }
}

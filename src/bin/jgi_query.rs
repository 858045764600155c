use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use jgi_query::app::{App, DecompressResult, DownloadResult, LoadedCatalog};
use jgi_query::config::{Config, ConfigLoader};
use jgi_query::domain::Organism;
use jgi_query::error::QueryError;
use jgi_query::index::human_size;
use jgi_query::output::{JsonOutput, OutputMode, RunSummary, StderrProgress};
use jgi_query::selection::{ALL_TOKEN, PATTERN_TOKEN, Selection};
use jgi_query::store::Store;
use jgi_query::transport::{CurlTransport, HttpTransport, Transport};

#[derive(Parser)]
#[command(name = "jgi-query")]
#[command(
    about = "List and retrieve files from a JGI genome portal dataset, with integrity checks and resumable batches"
)]
#[command(version)]
struct Cli {
    #[arg(help = "Portal abbreviation (e.g. Nemve1) or the dataset's info-page address")]
    organism: Option<String>,

    #[arg(
        short = 'x', long, value_name = "FILE", num_args = 0..=1, default_missing_value = "",
        help = "Use a local catalog index instead of retrieving one; without a value, <organism>_jgi_index.xml in the working directory"
    )]
    xml: Option<String>,

    #[arg(short, long, help = "Set or replace the stored portal credentials")]
    configure: bool,

    #[arg(short, long, help = "Only list the categories named in the config file")]
    filter_files: bool,

    #[arg(
        short = 'a', long, conflicts_with_all = ["regex", "select"],
        help = "Retrieve every listed file without prompting"
    )]
    get_all: bool,

    #[arg(
        short, long, value_name = "PATTERN", conflicts_with = "select",
        help = "Retrieve every file whose name matches PATTERN"
    )]
    regex: Option<String>,

    #[arg(
        short, long, value_name = "SELECTION",
        help = "Retrieve a selection such as '3:4,5;7:1-10,13'"
    )]
    select: Option<String>,

    #[arg(
        long = "retry-n", value_name = "N",
        help = "Additional attempts per file after the first"
    )]
    retry_n: Option<u32>,

    #[arg(short, long, value_name = "SECONDS", help = "Per-request timeout in seconds")]
    timeout: Option<u64>,

    #[arg(
        short, long, value_name = "LOG",
        help = "Retry exactly the URLs of a failure log from an earlier run"
    )]
    load_failed: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = TransportKind::Http)]
    transport: TransportKind,

    #[arg(long, help = "Decompress retrieved archives without asking")]
    decompress: bool,

    #[arg(long, help = "Keep archives after decompressing them")]
    keep_archives: bool,

    #[arg(long, help = "Keep the cookie file and a retrieved catalog index")]
    keep_temp: bool,

    #[arg(short = 'y', long, help = "Skip the confirmation before transferring")]
    yes: bool,

    #[arg(long)]
    non_interactive: bool,

    #[arg(long, value_name = "FILE", help = "Config file to use instead of the platform default")]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportKind {
    Http,
    Curl,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<QueryError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &QueryError) -> u8 {
    match error {
        QueryError::CatalogParse { .. }
        | QueryError::SelectionSyntax { .. }
        | QueryError::UnknownCoordinate { .. }
        | QueryError::InvalidPattern { .. }
        | QueryError::InvalidOrganism(_)
        | QueryError::NoOrganism
        | QueryError::NoResults { .. } => 2,
        QueryError::Authentication(_) | QueryError::Transport(_) | QueryError::MissingTool(_) => 3,
        QueryError::Aborted => 4,
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
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => ConfigLoader::default_path()?,
    };
    let nothing_to_do = cli.organism.is_none() && cli.xml.is_none() && cli.load_failed.is_none();
    if cli.configure {
        if output_mode == OutputMode::NonInteractive {
            return Err(miette::Report::msg(
                "--configure needs a terminal; edit the config file instead",
            ));
        }
        configure(&config_path)?;
        if nothing_to_do {
            return Ok(());
        }
    }
    if nothing_to_do {
        return Err(QueryError::NoOrganism.into());
    }

    let mut config = match ConfigLoader::resolve(Some(&config_path)) {
        Ok(config) => config,
        Err(QueryError::MissingConfig(_)) if output_mode == OutputMode::Interactive => {
            println!("No config file found at {}.", config_path.display());
            configure(&config_path)?;
            ConfigLoader::resolve(Some(&config_path))?
        }
        Err(err) => return Err(err.into()),
    };
    if let Some(retries) = cli.retry_n {
        config.retries = retries;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout = std::time::Duration::from_secs(timeout);
    }

    let store = Store::new()?;
    match cli.transport {
        TransportKind::Http => {
            let transport = HttpTransport::new(&config.signon_url)?;
            run_query(&cli, App::new(store, config, transport), output_mode)
        }
        TransportKind::Curl => {
            let transport = CurlTransport::new(&config.signon_url, store.cookie_path().as_std_path());
            run_query(&cli, App::new(store, config, transport), output_mode)
        }
    }
}

fn run_query<T: Transport>(
    cli: &Cli,
    mut app: App<T>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let interactive = output_mode == OutputMode::Interactive;
    let sink: &dyn jgi_query::app::ProgressSink = if interactive {
        &StderrProgress
    } else {
        &JsonOutput
    };

    let organism = cli
        .organism
        .as_deref()
        .map(str::parse::<Organism>)
        .transpose()?;
    let local_index = match cli.xml.as_deref() {
        None => None,
        Some("") => {
            let organism = organism.as_ref().ok_or(QueryError::NoOrganism)?;
            Some(app.store().index_path(organism))
        }
        Some(path) => Some(Utf8PathBuf::from(path)),
    };

    if let Some(log_path) = &cli.load_failed {
        let catalog = match &local_index {
            Some(index) => Some(app.load_catalog(organism.as_ref(), index, cli.filter_files)?),
            None => None,
        };
        let log_path = Utf8PathBuf::from_path_buf(log_path.clone())
            .map_err(|_| QueryError::Filesystem("invalid log path".to_string()))?;
        let download = app.retry_failed(&log_path, catalog.as_ref(), sink)?;
        return finish(cli, &app, catalog.as_ref(), download, output_mode);
    }

    let catalog = app.catalog(
        organism.as_ref(),
        local_index.as_deref(),
        cli.filter_files,
        sink,
    )?;

    let automated = if cli.get_all {
        Some(Selection::All)
    } else if let Some(pattern) = &cli.regex {
        Some(Selection::pattern(pattern)?)
    } else if let Some(selection) = &cli.select {
        Some(Selection::explicit(selection)?)
    } else {
        None
    };

    let urls = match automated {
        Some(selection) => selection.resolve(&catalog.view)?,
        None if interactive => {
            print!("{}", catalog.view.render());
            prompt_selection(&catalog)?
        }
        None => {
            JsonOutput::print_catalog(&catalog).into_diagnostic()?;
            if !cli.keep_temp {
                app.cleanup(Some(&catalog))?;
            }
            return Ok(());
        }
    };
    if urls.is_empty() {
        return Err(miette::Report::msg("selection matched no files"));
    }

    let total = catalog.view.total_size(&urls);
    if interactive {
        println!("Total download size for {} files: {}", urls.len(), human_size(total));
        if !cli.yes && !confirm("Continue? (y/n): ")? {
            return Err(QueryError::Aborted.into());
        }
    }

    let download = app.download(&catalog, &urls, sink)?;
    finish(cli, &app, Some(&catalog), download, output_mode)
}

fn finish<T: Transport>(
    cli: &Cli,
    app: &App<T>,
    catalog: Option<&LoadedCatalog>,
    download: DownloadResult,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let interactive = output_mode == OutputMode::Interactive;
    if interactive {
        print_download_summary(&download);
    }

    let wants_decompress = if cli.decompress {
        true
    } else if interactive && !download.retrieved.is_empty() {
        confirm("Decompress retrieved files? (y/n): ")?
    } else {
        false
    };
    let decompress = if wants_decompress {
        let keep = cli.keep_archives
            || (interactive && !cli.decompress && confirm("Keep original archives? (y/n): ")?);
        let sink: &dyn jgi_query::app::ProgressSink = if interactive {
            &StderrProgress
        } else {
            &JsonOutput
        };
        let result = app.decompress(&download.retrieved, keep, sink);
        if interactive {
            print_decompress_summary(&result);
        }
        Some(result)
    } else {
        None
    };

    let cleanup = if cli.keep_temp {
        None
    } else {
        Some(app.cleanup(catalog)?)
    };

    if !interactive {
        JsonOutput::print_summary(&RunSummary {
            catalog,
            download: Some(&download),
            decompress: decompress.as_ref(),
            cleanup: cleanup.as_ref(),
        })
        .into_diagnostic()?;
    }
    Ok(())
}

fn prompt_selection(catalog: &LoadedCatalog) -> miette::Result<Vec<String>> {
    loop {
        let input = prompt(&format!(
            "Enter file selection ('{ALL_TOKEN}' for all, '{PATTERN_TOKEN}' for a filename pattern, \
             e.g. '3:4,5;7:1-10,13'), or press Enter to quit: "
        ))?;
        let input = input.trim();
        if input.is_empty() {
            return Err(QueryError::Aborted.into());
        }
        let selection = match input {
            ALL_TOKEN => Ok(Selection::All),
            PATTERN_TOKEN => {
                let pattern = prompt("Enter a regular expression for filenames: ")?;
                Selection::pattern(pattern.trim())
            }
            other => Selection::explicit(other),
        };
        match selection.and_then(|selection| selection.resolve(&catalog.view)) {
            Ok(urls) if urls.is_empty() => println!("No files matched; try again."),
            Ok(urls) => return Ok(urls),
            Err(err) => eprintln!("{:?}", miette::Report::new(err)),
        }
    }
}

fn configure(path: &std::path::Path) -> miette::Result<()> {
    let mut config = ConfigLoader::load(path).unwrap_or_else(|_| Config::default());
    let user = prompt("JGI portal username (email): ")?;
    let password = prompt("JGI portal password: ")?;
    config.user = Some(user.trim().to_string());
    config.password = Some(password.trim_end_matches(['\r', '\n']).to_string());
    ConfigLoader::write(path, &config)?;
    println!("Config written to {}", path.display());
    Ok(())
}

fn prompt(message: &str) -> miette::Result<String> {
    print!("{message}");
    io::stdout().flush().into_diagnostic()?;
    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line).into_diagnostic()?;
    if read == 0 {
        return Err(QueryError::Aborted.into());
    }
    Ok(line)
}

fn confirm(message: &str) -> miette::Result<bool> {
    let answer = prompt(message)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn print_download_summary(result: &DownloadResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!(
        "{green}{} of {} files retrieved{reset}",
        result.report.downloaded.len(),
        result.requested.len()
    );
    for name in &result.malformed {
        println!("{yellow}malformed (left unmodified): {name}{reset}");
    }
    if !result.report.failed.is_empty() {
        println!("{red}{} files failed:{reset}", result.report.failed.len());
        for url in &result.report.failed {
            println!("  {url}");
        }
    }
    if let Some(log) = &result.failure_log {
        println!("Failed URLs written to {log}; rerun with --load-failed {log}");
    }
}

fn print_decompress_summary(result: &DecompressResult) {
    for item in &result.extracted {
        println!("decompressed {}", item.archive);
    }
    for error in &result.errors {
        println!("\x1b[31m{error}\x1b[0m");
    }
}

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use dotenv::dotenv;
use std::env;
use tracing::{error, info};

use govdata_worker_lib::build_info;
use govdata_worker_lib::db::build_db_pool;
use govdata_worker_lib::import_service::types::{BatchPolicy, RetryPolicy};
use govdata_worker_lib::import_service::{ImportConfig, ImportReport, ImportService, SourceKind};
use govdata_worker_lib::logging::init_logging;

#[derive(Debug, Parser)]
#[command(
    about = "Run one import from a local XML file and exit",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
struct Args {
    /// Import kind: govman or uscode
    #[arg(long)]
    source: String,

    /// XML file to import; repeat to run several files (e.g. every US Code
    /// title) and get one aggregated summary
    #[arg(long = "file", required = true)]
    files: Vec<PathBuf>,

    #[arg(long = "database-url")]
    database_url: Option<String>,

    /// US Code release point recorded on imported sections
    #[arg(long = "release-point")]
    release_point: Option<String>,

    #[arg(long = "batch-size", default_value_t = 100)]
    batch_size: usize,

    #[arg(long = "retry-attempts", default_value_t = 3)]
    retry_attempts: u32,
    #[arg(long = "retry-initial-ms", default_value_t = 100)]
    retry_initial_ms: u64,
    #[arg(long = "retry-max-ms", default_value_t = 5000)]
    retry_max_ms: u64,
    #[arg(long = "write-timeout-ms", default_value_t = 30_000)]
    write_timeout_ms: u64,

    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

fn resolve_database_url(args: &Args) -> Result<String, String> {
    if let Some(value) = &args.database_url {
        return Ok(value.clone());
    }

    env::var("DATABASE_URL")
        .map_err(|_| "DATABASE_URL is required (env var or --database-url)".to_string())
}

fn resolve_source_kind(args: &Args) -> Result<SourceKind, String> {
    match args.source.to_ascii_lowercase().as_str() {
        "govman" => Ok(SourceKind::Govman),
        "uscode" => Ok(SourceKind::UsCode),
        other => Err(format!("--source must be govman or uscode, got {other}")),
    }
}

fn validate_args(args: &Args) -> Result<(), String> {
    if args.batch_size == 0 {
        return Err("--batch-size must be > 0".to_string());
    }
    if args.retry_attempts == 0 {
        return Err("--retry-attempts must be > 0".to_string());
    }
    if args.retry_max_ms < args.retry_initial_ms {
        return Err(format!(
            "--retry-max-ms ({}) must be >= --retry-initial-ms ({})",
            args.retry_max_ms, args.retry_initial_ms
        ));
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv().ok();

    let args = Args::parse();
    let logging_context = init_logging("govdata_worker", "import_once", &args.log_level);
    let run_span = tracing::info_span!(
        "worker_run",
        service = %logging_context.service,
        mode = %logging_context.mode,
        run_id = %logging_context.run_id
    );
    let _run_guard = run_span.enter();

    if let Err(err) = validate_args(&args) {
        eprintln!("{err}");
        std::process::exit(2);
    }

    let kind = match resolve_source_kind(&args) {
        Ok(value) => value,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    let db_url = match resolve_database_url(&args) {
        Ok(value) => value,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    let pool = match build_db_pool(&db_url).await {
        Ok(value) => value,
        Err(err) => {
            eprintln!("failed to build db pool: {err}");
            std::process::exit(1);
        }
    };

    let import_config = ImportConfig {
        batch_policy: BatchPolicy {
            max_records: args.batch_size,
            write_timeout: Duration::from_millis(args.write_timeout_ms),
        },
        retry_policy: RetryPolicy {
            max_attempts: args.retry_attempts,
            initial_backoff: Duration::from_millis(args.retry_initial_ms),
            max_backoff: Duration::from_millis(args.retry_max_ms),
        },
    };
    let service = ImportService::new(pool, import_config);

    info!(
        event = "import_once_starting",
        source = kind.as_str(),
        files = args.files.len(),
        "starting one-shot import"
    );

    let mut aggregate: Option<ImportReport> = None;
    for path in &args.files {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) => {
                eprintln!("could not open {}: {err}", path.display());
                std::process::exit(2);
            }
        };
        let stream: Box<dyn BufRead + Send> = Box::new(BufReader::new(file));

        info!(event = "importing_file", file = %path.display(), "importing file");
        match service
            .run_import(kind, stream, args.release_point.as_deref())
            .await
        {
            Ok(report) => match aggregate.as_mut() {
                Some(aggregate) => aggregate.absorb(&report),
                None => aggregate = Some(report),
            },
            Err(err) => {
                error!(event = "import_once_failed", error = %err, "one-shot import failed");
                eprintln!("import failed: {err}");
                std::process::exit(1);
            }
        }
    }

    // clap's `required = true` guarantees at least one file ran.
    if let Some(report) = aggregate {
        println!("{}", report.summary());
        if report.is_failed() {
            std::process::exit(1);
        }
    }
}

mod logging;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use datasubset_core::{
    DatabaseGraph, Error as CoreError, ExportConfig, TableDependencyGraphBuilder,
    redact_connection_string,
};
use datasubset_export::{
    ExportRun, ExportTraversal, InsertStatementExporter, ItemGenerator, RecordExporter, RowSource,
    write_frame,
};
use datasubset_postgres::{PostgresDialect, PostgresDiscoverer, PostgresRowSource, connect};
use logging::{LoggingError, init_logging};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
enum CliError {
    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unsupported engine: {0}")]
    UnsupportedEngine(String),
}

#[derive(Parser, Debug)]
#[command(
    name = "datasubset",
    version,
    about = "Export a referentially complete subset of a database"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export the configured rows and everything they reference.
    Export(ExportArgs),
    /// Print the table dependency graph summary or one table's tree.
    Graph(GraphArgs),
    /// Print the JSON schema of the export config file.
    ConfigSchema,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Export config file (JSON, or TOML with a .toml extension).
    #[arg(long, value_name = "FILE")]
    config: PathBuf,
    /// Output file. Defaults to stdout.
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,
    /// Output format: insert or binary.
    #[arg(long)]
    format: String,
    /// Database type.
    #[arg(long)]
    db_type: String,
    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Args, Debug)]
struct GraphArgs {
    #[arg(long, value_name = "FILE")]
    config: PathBuf,
    #[arg(long)]
    db_type: String,
    /// Print the dependency tree of `schema.table` instead of the summary.
    #[arg(long, value_name = "SCHEMA.TABLE")]
    table: Option<String>,
    /// Fail on dependency cycles instead of falling back to discovery order.
    #[arg(long)]
    strict: bool,
    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Database connection URL; overrides connectionString in the config.
    #[arg(long, value_name = "CONNECTION_STRING")]
    conn: Option<String>,
    /// Schema name(s) to discover; overrides the config.
    #[arg(long, value_name = "SCHEMA")]
    schema: Vec<String>,
    /// Append JSON logs to this file instead of logging to stderr.
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Insert,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbType {
    Postgres,
}

impl DbType {
    fn name(self) -> &'static str {
        match self {
            DbType::Postgres => "postgres",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
            let _ = err.print();
            return code;
        }
    };

    let result = match cli.command {
        Command::Export(args) => run_export(args).await,
        Command::Graph(args) => run_graph(args).await,
        Command::ConfigSchema => print_config_schema(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(event = "run_failed", error = %err);
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run_export(args: ExportArgs) -> Result<(), CliError> {
    let ExportArgs {
        config,
        out,
        format,
        db_type,
        connection,
    } = args;

    let format = parse_format(&format)?;
    let db_type = parse_db_type(&db_type)?;
    init_logging(connection.log_file.as_deref())?;

    let config_path = config;
    let config = load_config(&config_path)?;
    let conn = resolve_connection(connection.conn, &config)?;
    detect_engine(&conn)?;
    let schemas = resolve_schemas(connection.schema, &config);

    let run_id = Uuid::new_v4().to_string();
    let started_at = chrono::Utc::now();
    let redacted = redact_connection_string(&conn);
    tracing::info!(
        event = "run_started",
        run_id = %run_id,
        command = "export",
        engine = db_type.name(),
        connection = %redacted.redacted,
        started_at = %started_at.to_rfc3339()
    );
    let timer = Instant::now();

    let pool = connect(&conn).await?;
    let mut builder = TableDependencyGraphBuilder::new(PostgresDiscoverer::new(pool.clone()));
    let graph = builder
        .build_dependency_graph(&schemas, &config.model_config, &config.table_ignore_config)
        .await?;

    let sink: Box<dyn Write> = match &out {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout().lock()),
    };
    let mut sink = BufWriter::new(sink);
    let source = PostgresRowSource::new(pool);

    let items = match format {
        OutputFormat::Insert => {
            let generator = InsertStatementExporter::new(PostgresDialect);
            let mut traversal = ExportTraversal::new(source, generator);
            let run = traversal.export(&config.tables_to_export, graph);
            drain(run, |statement| {
                writeln!(sink, "{statement}")?;
                Ok(())
            })
            .await?
        }
        OutputFormat::Binary => {
            let generator = RecordExporter::new(db_type.name());
            let mut traversal = ExportTraversal::new(source, generator);
            let run = traversal.export(&config.tables_to_export, graph);
            drain(run, |record| Ok(write_frame(&mut sink, &record)?)).await?
        }
    };
    sink.flush()?;

    if let Some(path) = &out {
        tracing::info!(event = "output_written", path = %path.display(), items);
    }
    let duration_ms = timer.elapsed().as_millis();
    tracing::info!(event = "run_finished", status = "success", items, duration_ms = duration_ms);

    Ok(())
}

async fn run_graph(args: GraphArgs) -> Result<(), CliError> {
    let GraphArgs {
        config,
        db_type,
        table,
        strict,
        connection,
    } = args;

    let db_type = parse_db_type(&db_type)?;
    let table = table.as_deref().map(split_table).transpose()?;
    init_logging(connection.log_file.as_deref())?;

    let config = load_config(&config)?;
    let conn = resolve_connection(connection.conn, &config)?;
    detect_engine(&conn)?;
    let schemas = resolve_schemas(connection.schema, &config);

    let redacted = redact_connection_string(&conn);
    tracing::info!(
        event = "run_started",
        command = "graph",
        engine = db_type.name(),
        connection = %redacted.redacted
    );

    let pool = connect(&conn).await?;
    let mut builder = TableDependencyGraphBuilder::new(PostgresDiscoverer::new(pool));
    builder
        .build_dependency_graph(&schemas, &config.model_config, &config.table_ignore_config)
        .await?;
    if strict {
        let order = builder.strict_dependency_order()?;
        tracing::info!(event = "dependency_order_resolved", tables = order.len());
    }

    let output = match table {
        Some((schema, name)) => builder.dependency_tree(schema, name).ok_or_else(|| {
            CliError::InvalidConfig(format!("table {schema}.{name} not found in graph"))
        })?,
        None => serde_json::to_string_pretty(&builder.summary())?,
    };
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{output}")?;

    report_graph(builder.graph());
    Ok(())
}

fn print_config_schema() -> Result<(), CliError> {
    let schema = schemars::schema_for!(ExportConfig);
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", serde_json::to_string_pretty(&schema)?)?;
    Ok(())
}

async fn drain<S, G>(
    mut run: ExportRun<'_, S, G>,
    mut write: impl FnMut(G::Item) -> Result<(), CliError>,
) -> Result<usize, CliError>
where
    S: RowSource,
    G: ItemGenerator,
{
    let mut items = 0;
    while let Some(item) = run.next().await {
        write(item?)?;
        items += 1;
    }
    Ok(items)
}

fn report_graph(graph: &DatabaseGraph) {
    let statistics = graph.statistics();
    tracing::info!(event = "graph_reported", statistics = %statistics);
}

fn load_config(path: &std::path::Path) -> Result<ExportConfig, CliError> {
    let config = ExportConfig::from_path(path)?;
    let errors = config.validate();
    if !errors.is_empty() {
        for error in &errors {
            tracing::error!(event = "config_invalid", error = %error);
        }
        return Err(CliError::InvalidConfig(errors.join("; ")));
    }
    tracing::info!(
        event = "config_loaded",
        path = %path.display(),
        roots = config.tables_to_export.len(),
        model_configs = config.model_config.len(),
        ignored = config.table_ignore_config.len()
    );
    Ok(config)
}

fn parse_format(raw: &str) -> Result<OutputFormat, CliError> {
    match raw.to_ascii_lowercase().as_str() {
        "insert" => Ok(OutputFormat::Insert),
        "binary" => Ok(OutputFormat::Binary),
        _ => Err(CliError::InvalidConfig(format!(
            "unknown format {raw}; expected insert or binary"
        ))),
    }
}

fn parse_db_type(raw: &str) -> Result<DbType, CliError> {
    match raw.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" => Ok(DbType::Postgres),
        "sqlserver" | "mysql" => Err(CliError::UnsupportedEngine(raw.to_string())),
        _ => Err(CliError::InvalidConfig(format!("unknown database type {raw}"))),
    }
}

fn resolve_connection(flag: Option<String>, config: &ExportConfig) -> Result<String, CliError> {
    flag.or_else(|| config.connection_string.clone())
        .filter(|conn| !conn.trim().is_empty())
        .ok_or_else(|| CliError::InvalidConfig("connection string is required".to_string()))
}

fn resolve_schemas(flag: Vec<String>, config: &ExportConfig) -> Vec<String> {
    if flag.is_empty() {
        config.discovery_schemas()
    } else {
        flag
    }
}

fn detect_engine(conn: &str) -> Result<&'static str, CliError> {
    if conn.starts_with("postgres://") || conn.starts_with("postgresql://") {
        Ok("postgres")
    } else {
        Err(CliError::UnsupportedEngine(
            redact_connection_string(conn).redacted,
        ))
    }
}

fn split_table(raw: &str) -> Result<(&str, &str), CliError> {
    raw.split_once('.')
        .filter(|(schema, table)| !schema.is_empty() && !table.is_empty())
        .ok_or_else(|| CliError::InvalidConfig(format!("expected schema.table, got {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use datasubset_core::TableExportConfig;

    fn config() -> ExportConfig {
        ExportConfig {
            tables_to_export: vec![
                TableExportConfig::new("sales", "orders"),
                TableExportConfig::new("hr", "people"),
            ],
            connection_string: Some("postgres://app:secret@db/shop".to_string()),
            ..ExportConfig::default()
        }
    }

    #[test]
    fn parses_export_command() {
        let cli = Cli::try_parse_from([
            "datasubset",
            "export",
            "--config",
            "export.json",
            "--format",
            "binary",
            "--db-type",
            "postgres",
            "--schema",
            "sales",
        ])
        .unwrap();
        let Command::Export(args) = cli.command else {
            panic!("expected export command");
        };
        assert_eq!(args.format, "binary");
        assert_eq!(args.connection.schema, vec!["sales"]);
        assert!(args.out.is_none());
    }

    #[test]
    fn graph_command_accepts_strict_flag() {
        let cli = Cli::try_parse_from([
            "datasubset",
            "graph",
            "--config",
            "export.json",
            "--db-type",
            "postgres",
            "--strict",
        ])
        .unwrap();
        let Command::Graph(args) = cli.command else {
            panic!("expected graph command");
        };
        assert!(args.strict);
        assert!(args.table.is_none());
    }

    #[test]
    fn format_and_db_type_are_validated() {
        assert_eq!(parse_format("INSERT").unwrap(), OutputFormat::Insert);
        assert!(matches!(parse_format("csv"), Err(CliError::InvalidConfig(_))));
        assert_eq!(parse_db_type("postgresql").unwrap(), DbType::Postgres);
        assert!(matches!(
            parse_db_type("sqlserver"),
            Err(CliError::UnsupportedEngine(_))
        ));
        assert!(matches!(parse_db_type("oracle"), Err(CliError::InvalidConfig(_))));
    }

    #[test]
    fn command_line_overrides_config() {
        let config = config();
        assert_eq!(
            resolve_connection(Some("postgres://other/db".into()), &config).unwrap(),
            "postgres://other/db"
        );
        assert_eq!(
            resolve_connection(None, &config).unwrap(),
            "postgres://app:secret@db/shop"
        );
        assert!(resolve_connection(None, &ExportConfig::default()).is_err());

        assert_eq!(resolve_schemas(vec!["x".into()], &config), vec!["x"]);
        assert_eq!(resolve_schemas(Vec::new(), &config), vec!["hr", "sales"]);
    }

    #[test]
    fn unsupported_connection_is_reported_redacted() {
        let err = detect_engine("Server=db;Password=hunter2").unwrap_err();
        assert!(!err.to_string().contains("hunter2"));
        assert_eq!(detect_engine("postgresql://db/x").unwrap(), "postgres");
    }

    #[test]
    fn table_argument_needs_schema_and_name() {
        assert_eq!(split_table("public.users").unwrap(), ("public", "users"));
        assert!(split_table("users").is_err());
        assert!(split_table(".users").is_err());
    }
}

use std::process;

use clap::{Parser, Subcommand};
use dbdb::{Config, Dbdb, DbdbError, Document, ViewOptions};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dbdb", about = "Read and write CouchDB documents and views")]
struct Cli {
    /// Server URL
    #[arg(long, env = "DBDB_URL", default_value = "http://localhost:5984")]
    url: String,

    /// Database name
    #[arg(long, env = "DBDB_DB")]
    db: String,

    /// Key (user name) for cookie authentication
    #[arg(long, env = "DBDB_KEY")]
    key: Option<String>,

    /// Password for cookie authentication
    #[arg(long, env = "DBDB_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Pretty-print JSON output
    #[arg(short, long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Get documents by ID (several IDs are fetched in one request)
    Get {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Insert a document given as a JSON string
    Insert { json: String },

    /// Merge a JSON document into the stored one with the same id
    Update { json: String },

    /// Delete the current revision of a document
    Delete { id: String },

    /// Insert every document of a JSON array file
    Import { file: String },

    /// Delete every document of a JSON array file (each needs id and _rev)
    DeleteMany { file: String },

    /// Query a view given as <designDoc>:<viewName>
    View {
        view: String,
        /// Filter key as JSON (array for a prefix scan)
        #[arg(long)]
        filter: Option<String>,
        /// Number of rows to skip
        #[arg(long)]
        first: Option<u64>,
        /// Start cursor as JSON
        #[arg(long)]
        first_key: Option<String>,
        /// End cursor as JSON
        #[arg(long)]
        last_key: Option<String>,
        /// Maximum number of rows
        #[arg(long)]
        max: Option<u64>,
        /// Reverse the order of results
        #[arg(long)]
        descending: bool,
    },
}

fn parse_json(what: &str, input: &str) -> dbdb::Result<Value> {
    serde_json::from_str(input)
        .map_err(|e| DbdbError::Validation(format!("invalid JSON for {}: {}", what, e)))
}

fn parse_opt(what: &str, input: Option<String>) -> dbdb::Result<Option<Value>> {
    input.map(|s| parse_json(what, &s)).transpose()
}

fn read_docs(file: &str) -> dbdb::Result<Vec<Document>> {
    let content = std::fs::read_to_string(file)
        .map_err(|e| DbdbError::Validation(format!("cannot read file '{}': {}", file, e)))?;
    match parse_json(file, &content)? {
        Value::Array(items) => items.into_iter().map(Document::from_json).collect(),
        _ => Err(DbdbError::Validation(format!(
            "'{}' must contain a JSON array of documents",
            file
        ))),
    }
}

fn print_json(value: &Value, pretty: bool) {
    if pretty {
        println!("{:#}", value);
    } else {
        println!("{}", value);
    }
}

fn print_docs(docs: &[Document], pretty: bool) {
    let value = Value::Array(docs.iter().map(Document::to_json).collect());
    print_json(&value, pretty);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = run(cli).await;
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> dbdb::Result<()> {
    let mut config = Config::new(cli.url, cli.db);
    match (cli.key, cli.password) {
        (Some(key), Some(password)) => config = config.with_credentials(key, password),
        (None, None) => {}
        _ => {
            return Err(DbdbError::Validation(
                "--key and --password must be given together".into(),
            ));
        }
    }
    let db = Dbdb::new(config);

    match cli.command {
        Commands::Get { ids } => {
            if let [id] = ids.as_slice() {
                let doc = db.get(id).await?;
                print_json(&doc.to_json(), cli.pretty);
            } else {
                let docs = db.get_many(&ids).await?;
                let value = Value::Array(
                    docs.iter()
                        .map(|d| d.as_ref().map_or(Value::Null, Document::to_json))
                        .collect(),
                );
                print_json(&value, cli.pretty);
            }
        }

        Commands::Insert { json } => {
            let doc = Document::from_json(parse_json("document", &json)?)?;
            let doc = db.insert(doc).await?;
            print_json(&doc.to_json(), cli.pretty);
        }

        Commands::Update { json } => {
            let doc = Document::from_json(parse_json("document", &json)?)?;
            let doc = db.update(doc).await?;
            print_json(&doc.to_json(), cli.pretty);
        }

        Commands::Delete { id } => {
            let doc = db.delete(&id).await?;
            print_json(&doc.to_json(), cli.pretty);
        }

        Commands::Import { file } => {
            let docs = db.insert_many(read_docs(&file)?).await?;
            print_docs(&docs, cli.pretty);
        }

        Commands::DeleteMany { file } => {
            let docs = db.delete_many(read_docs(&file)?).await?;
            print_docs(&docs, cli.pretty);
        }

        Commands::View {
            view,
            filter,
            first,
            first_key,
            last_key,
            max,
            descending,
        } => {
            let options = ViewOptions {
                filter: parse_opt("--filter", filter)?,
                first,
                first_key: parse_opt("--first-key", first_key)?,
                last_key: parse_opt("--last-key", last_key)?,
                max,
                descending,
            };
            let docs = db.get_view(&view, &options).await?;
            print_docs(&docs, cli.pretty);
        }
    }

    Ok(())
}

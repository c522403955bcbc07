use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use vecstore::{
    Dataset,
    Filter,
    HashingEmbedder,
    Library,
    SearchHit,
    SearchRequest,
    StoreConfig,
    VectorStore,
    error::{self, Error},
    index::{IndexKind, Metric},
    store::Query,
};

mod cli;

use cli::{Cli, Command, DatasetArgs, SearchArgs, StatsArgs};

const LOG_ENV_VAR: &str = "VECSTORE_LOG";

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var(LOG_ENV_VAR) {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Command::Search(args) => cmd_search(&args)?,
        Command::Stats(args) => cmd_stats(&args)?,
        Command::Completions(args) => args.generate(),
    }

    Ok(())
}

fn open_store(
    args: &DatasetArgs,
    config: StoreConfig,
) -> error::Result<(VectorStore, Vec<Library>)> {
    let store = VectorStore::with_embedder(
        config,
        Arc::new(HashingEmbedder::new(args.embed_dim)),
    );
    let libraries =
        Dataset::from_path(&args.dataset)?.load_into(&store, args.auto_embed)?;
    Ok((store, libraries))
}

fn pick_library<'a>(
    libraries: &'a [Library],
    name: Option<&str>,
) -> error::Result<&'a Library> {
    match name {
        Some(name) => libraries
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| Error::NotFound {
                kind: "library",
                id: name.to_string(),
            }),
        None => match libraries {
            [only] => Ok(only),
            _ => Err(Error::Config(format!(
                "dataset has {} libraries; pick one with --library",
                libraries.len()
            ))),
        },
    }
}

fn cmd_search(args: &SearchArgs) -> error::Result<()> {
    let mut config = StoreConfig::from_env()?;
    if let Some(factor) = args.expansion_factor {
        config = config.with_expansion_factor(factor);
    }
    if let Some(factor) = args.rerank_factor {
        config = config.with_rerank_factor(factor);
    }

    let (store, libraries) = open_store(&args.dataset, config)?;
    let library = pick_library(&libraries, args.library.as_deref())?;

    let query = match &args.text {
        Some(text) => Query::Text(text.clone()),
        None => Query::Vector(args.vector.clone()),
    };
    let mut request =
        SearchRequest::new(library.id, store.query_vector(query)?, args.k)
            .with_metric(args.metric);
    if let Some(kind) = args.index {
        request = request.with_index_kind(kind);
    }
    if let Some(expr) = &args.filter {
        request = request.with_filter(Filter::from_json(serde_json::from_str(
            expr,
        )?)?);
    }

    let kind = args.index.unwrap_or_else(|| store.index_kind(library.id));
    let results = store.search(&request)?;

    if args.json {
        format_json(library, args.metric, kind, &results)?;
    } else {
        format_human(&results);
    }
    Ok(())
}

fn cmd_stats(args: &StatsArgs) -> error::Result<()> {
    let (store, libraries) =
        open_store(&args.dataset, StoreConfig::from_env()?)?;
    let totals = store.stats();

    if args.json {
        let per_library: Vec<_> = libraries
            .iter()
            .map(|l| {
                json!({
                    "id": l.id,
                    "name": l.name,
                    "documents": l.documents.len(),
                    "chunks": store
                        .list_library_chunks(l.id)
                        .map(|c| c.len())
                        .unwrap_or(0),
                    "dimension": l.dimension,
                    "index": store.index_kind(l.id),
                })
            })
            .collect();
        let output = json!({
            "libraries": totals.libraries,
            "documents": totals.documents,
            "chunks": totals.chunks,
            "per_library": per_library,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Libraries: {}", totals.libraries);
        println!("Documents: {}", totals.documents);
        println!("Chunks: {}", totals.chunks);
        for l in &libraries {
            let chunks = store.list_library_chunks(l.id)?.len();
            let dimension = l
                .dimension
                .map_or_else(|| "-".to_string(), |d| d.to_string());
            println!(
                "  {}: {} document(s), {chunks} chunk(s), dim {dimension}, {}",
                l.name,
                l.documents.len(),
                store.index_kind(l.id)
            );
        }
    }
    Ok(())
}

/// Format results for a terminal.
fn format_human(results: &[SearchHit]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    for (i, hit) in results.iter().enumerate() {
        println!(
            "{:>3}. [{:.4}] #{} (distance {:.4})",
            i + 1,
            hit.similarity,
            hit.chunk.id.short(8),
            hit.distance
        );
        let text: String = hit.chunk.text.chars().take(80).collect();
        if !text.is_empty() {
            println!("     {text}");
        }
    }
    println!("\n{} result(s)", results.len());
}

#[derive(Serialize)]
struct SearchOutput<'a> {
    library: &'a str,
    metric: Metric,
    index: IndexKind,
    result_count: usize,
    results: &'a [SearchHit],
}

fn format_json(
    library: &Library,
    metric: Metric,
    index: IndexKind,
    results: &[SearchHit],
) -> error::Result<()> {
    let output = SearchOutput {
        library: &library.name,
        metric,
        index,
        result_count: results.len(),
        results,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

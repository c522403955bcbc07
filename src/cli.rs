use std::path::PathBuf;

use clap::{ArgGroup, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use vecstore::index::{IndexKind, Metric};

#[derive(Debug, Parser)]
#[command(
    name = "vecstore",
    about = "In-memory vector search over JSON datasets"
)]
pub struct Cli {
    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load a dataset and run a k-nearest-neighbour query
    Search(SearchArgs),
    /// Load a dataset and print entity counts
    Stats(StatsArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Dataset loading --

#[derive(Debug, Clone, Parser)]
pub struct DatasetArgs {
    /// Path to a JSON dataset file
    pub dataset: PathBuf,

    /// Embed chunks that carry no vector
    #[arg(long)]
    pub auto_embed: bool,

    /// Dimension of the built-in hashing embedder
    #[arg(long, default_value = "256")]
    pub embed_dim: usize,
}

// -- Search --

#[derive(Debug, Parser)]
#[command(group(
    ArgGroup::new("query").required(true).args(["vector", "text"])
))]
pub struct SearchArgs {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// Library to search; optional when the dataset has only one
    #[arg(short, long)]
    pub library: Option<String>,

    /// Query vector as comma-separated numbers
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub vector: Vec<f32>,

    /// Query text, embedded with the hashing embedder
    #[arg(long)]
    pub text: Option<String>,

    /// Number of results to return
    #[arg(short, long, default_value = "10")]
    pub k: usize,

    /// Similarity metric (cosine, euclidean, dot_product)
    #[arg(short, long, default_value = "cosine")]
    pub metric: Metric,

    /// Index kind (exhaustive, spatial_tree); defaults to the library's
    #[arg(short, long)]
    pub index: Option<IndexKind>,

    /// Metadata filter as a JSON object
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Over-fetch multiplier for filtered queries
    #[arg(long)]
    pub expansion_factor: Option<usize>,

    /// Candidate pool multiplier for approximate spatial-tree queries
    #[arg(long)]
    pub rerank_factor: Option<usize>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Stats --

#[derive(Debug, Parser)]
pub struct StatsArgs {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "vecstore",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli =
            Cli::parse_from(["vecstore", "search", "data.json", "--text", "hi"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.dataset.dataset, PathBuf::from("data.json"));
                assert_eq!(args.text.as_deref(), Some("hi"));
                assert!(args.vector.is_empty());
                assert_eq!(args.k, 10);
                assert_eq!(args.metric, Metric::Cosine);
                assert_eq!(args.index, None);
                assert_eq!(args.dataset.embed_dim, 256);
                assert!(!args.json);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_vector_query() {
        let cli = Cli::parse_from([
            "vecstore",
            "search",
            "data.json",
            "--vector",
            "-1,0.5,2",
            "-k",
            "3",
            "--metric",
            "euclidean",
            "--index",
            "kdtree",
        ]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.vector, vec![-1.0, 0.5, 2.0]);
                assert_eq!(args.k, 3);
                assert_eq!(args.metric, Metric::Euclidean);
                assert_eq!(args.index, Some(IndexKind::SpatialTree));
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn search_requires_a_query() {
        assert!(
            Cli::try_parse_from(["vecstore", "search", "data.json"]).is_err()
        );
        assert!(
            Cli::try_parse_from([
                "vecstore",
                "search",
                "data.json",
                "--metric",
                "manhattan",
                "--text",
                "x",
            ])
            .is_err()
        );
    }

    #[test]
    fn command_is_well_formed() {
        Cli::command().debug_assert();
    }
}

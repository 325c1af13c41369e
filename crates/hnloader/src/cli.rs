//! Exposes the command line application.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loader_cache::metrics;
use tokio::runtime::Handle;
use tracing::level_filters::LevelFilter;

use crate::api::HnClient;
use crate::config::Config;
use crate::loaders::Loaders;
use crate::logging;
use crate::models::StoryList;
use crate::output::{self, OutputFormat};

/// Loader commands.
#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Print the stories of one of the ranked lists.
    List {
        /// The list to print.
        #[arg(value_enum)]
        list: StoryList,

        /// How many stories to print.
        #[arg(long, short = 'n', default_value_t = 30)]
        limit: usize,
    },

    /// Print a single story.
    Item {
        /// The id of the story.
        id: u32,

        /// Also print the top-level comments.
        #[arg(long)]
        comments: bool,
    },

    /// Print a single comment and its direct replies.
    Comment {
        /// The id of the comment.
        id: u32,
    },
}

/// Reads stories and comments from Hacker News.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// The severity level of logging output, overriding the configuration file.
    ///
    /// Possible values:
    /// off, error, warn, info, debug, trace
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

    /// The output format.
    #[arg(long, value_enum, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::get(cli.config.as_deref()).context("failed loading config")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    // SAFETY: The runtime is not started yet, so this is the only thread.
    unsafe { logging::init_logging(&config) };
    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to set up statsd metrics")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("hnloader-fetch")
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    runtime.block_on(run(cli.command, cli.format, config))
}

async fn run(command: Command, format: OutputFormat, config: Config) -> Result<()> {
    let client = HnClient::new(&config.api)?;
    let loaders = Loaders::new(&config, client, Handle::current());

    match command {
        Command::List { list, limit } => {
            let stories = loaders
                .stories(list, limit)
                .await
                .with_context(|| format!("failed to load the {list} stories"))?;
            output::print_stories(&stories, format)?;
        }
        Command::Item { id, comments } => {
            let story = loaders
                .story(id)
                .await
                .with_context(|| format!("failed to load item {id}"))?;
            let comments = if comments {
                loaders.comments(&story.comment_ids).await
            } else {
                Vec::new()
            };
            output::print_item(&story, &comments, format)?;
        }
        Command::Comment { id } => {
            let comment = loaders
                .comment(id)
                .await
                .with_context(|| format!("failed to load comment {id}"))?;
            let replies = loaders.comments(&comment.reply_ids).await;
            output::print_comment(&comment, &replies, format)?;
        }
    }

    loaders.log_stats();
    Ok(())
}

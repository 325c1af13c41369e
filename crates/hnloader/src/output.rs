use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

use crate::models::{Comment, Story};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per item.
    Text,
    /// The decoded items as pretty-printed JSON.
    Json,
}

#[derive(Debug, Serialize)]
struct ItemOutput<'a> {
    story: &'a Story,
    comments: &'a [Arc<Comment>],
}

#[derive(Debug, Serialize)]
struct CommentOutput<'a> {
    comment: &'a Comment,
    replies: &'a [Arc<Comment>],
}

fn story_line(rank: usize, story: &Story) -> String {
    format!(
        "{rank:>3}. [{score:>4}] {title} ({id}, {comments} comments)",
        score = story.score,
        title = story.title(),
        id = story.id,
        comments = story.comment_count,
    )
}

fn comment_line(comment: &Comment) -> String {
    let date = comment.date.format("%Y-%m-%d %H:%M");
    match comment.reply_count() {
        0 => format!("{} at {date}: {}", comment.author, comment.text),
        n => format!(
            "{} at {date} ({n} replies): {}",
            comment.author, comment.text
        ),
    }
}

pub fn print_stories(stories: &[Arc<Story>], format: OutputFormat) -> Result<()> {
    let mut out = io::stdout().lock();
    match format {
        OutputFormat::Text => {
            for (index, story) in stories.iter().enumerate() {
                writeln!(out, "{}", story_line(index + 1, story))?;
            }
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, stories)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

pub fn print_item(story: &Story, comments: &[Arc<Comment>], format: OutputFormat) -> Result<()> {
    let mut out = io::stdout().lock();
    match format {
        OutputFormat::Text => {
            writeln!(out, "{}", story_line(1, story))?;
            if let Some(url) = &story.url {
                writeln!(out, "     {url}")?;
            }
            for comment in comments {
                writeln!(out, "     - {}", comment_line(comment))?;
            }
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, &ItemOutput { story, comments })?;
            writeln!(out)?;
        }
    }
    Ok(())
}

pub fn print_comment(
    comment: &Comment,
    replies: &[Arc<Comment>],
    format: OutputFormat,
) -> Result<()> {
    let mut out = io::stdout().lock();
    match format {
        OutputFormat::Text => {
            writeln!(out, "{}", comment_line(comment))?;
            for reply in replies {
                writeln!(out, "  - {}", comment_line(reply))?;
            }
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, &CommentOutput { comment, replies })?;
            writeln!(out)?;
        }
    }
    Ok(())
}

//! The Hacker News items this loader understands.

use std::fmt;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use url::Url;

/// The placeholder for the text and author of deleted comments.
pub const DELETED: &str = "[Deleted]";

fn deleted() -> String {
    DELETED.to_owned()
}

/// One of the ranked story lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum)]
pub enum StoryList {
    /// The front page.
    Top,
    /// The newest stories.
    New,
    /// The highest voted recent stories.
    Best,
}

impl StoryList {
    /// The path of the list relative to the API root.
    pub fn path(self) -> &'static str {
        match self {
            StoryList::Top => "topstories.json",
            StoryList::New => "newstories.json",
            StoryList::Best => "beststories.json",
        }
    }
}

impl fmt::Display for StoryList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoryList::Top => "top",
            StoryList::New => "new",
            StoryList::Best => "best",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Story {
    pub id: u32,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub title: Option<String>,
    /// The total number of comments in the discussion.
    #[serde(rename = "descendants", default)]
    pub comment_count: u32,
    /// The top-level comments, in ranked order.
    #[serde(rename = "kids", default)]
    pub comment_ids: Vec<u32>,
    #[serde(rename = "by", default)]
    pub author: Option<String>,
    #[serde(rename = "time", default, with = "chrono::serde::ts_seconds_option")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub url: Option<Url>,
}

impl Story {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(DELETED)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Comment {
    pub id: u32,
    /// The comment body as HTML.
    #[serde(default = "deleted")]
    pub text: String,
    #[serde(rename = "kids", default)]
    pub reply_ids: Vec<u32>,
    #[serde(rename = "by", default = "deleted")]
    pub author: String,
    #[serde(rename = "time", with = "chrono::serde::ts_seconds")]
    pub date: DateTime<Utc>,
}

impl Comment {
    pub fn reply_count(&self) -> usize {
        self.reply_ids.len()
    }
}

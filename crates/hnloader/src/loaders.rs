//! One cache per kind of resource, all backed by the same API client.

use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use loader_cache::{AsyncFetcher, Cache};
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;

use crate::api::{FetchError, HnClient};
use crate::config::Config;
use crate::models::{Comment, Story, StoryList};

type FetchFn<K, V> = Box<dyn Fn(K) -> BoxFuture<'static, Result<V, FetchError>> + Send + Sync>;

/// Runs API requests on the loader runtime, one task per fetch.
pub type ApiFetcher<K, V> = AsyncFetcher<FetchFn<K, V>>;

pub type StoryCache = Cache<u32, Arc<Story>, FetchError, ApiFetcher<u32, Arc<Story>>>;
pub type CommentCache = Cache<u32, Arc<Comment>, FetchError, ApiFetcher<u32, Arc<Comment>>>;
pub type ListCache = Cache<StoryList, Arc<[u32]>, FetchError, ApiFetcher<StoryList, Arc<[u32]>>>;

fn api_fetcher<K, V, F, Fut>(runtime: Handle, fetch: F) -> ApiFetcher<K, V>
where
    K: 'static,
    V: 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
{
    let fetch: FetchFn<K, V> = Box::new(move |key: K| fetch(key).boxed());
    AsyncFetcher::new(runtime, fetch)
}

fn item_fetcher<T>(client: HnClient, runtime: Handle) -> ApiFetcher<u32, Arc<T>>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    api_fetcher(runtime, move |id: u32| {
        let client = client.clone();
        async move { client.item::<T>(id).await.map(Arc::new) }
    })
}

/// The caches for every resource kind.
#[derive(Clone, Debug)]
pub struct Loaders {
    lists: ListCache,
    stories: StoryCache,
    comments: CommentCache,
}

impl Loaders {
    /// Creates empty caches that spawn their fetches onto `runtime`.
    pub fn new(config: &Config, client: HnClient, runtime: Handle) -> Self {
        let lists = {
            let client = client.clone();
            api_fetcher(runtime.clone(), move |list: StoryList| {
                let client = client.clone();
                async move { client.story_ids(list).await.map(Arc::<[u32]>::from) }
            })
        };
        let stories = item_fetcher(client.clone(), runtime.clone());
        let comments = item_fetcher(client, runtime);

        Self {
            lists: Cache::new(config.caches.lists.clone(), lists),
            stories: Cache::new(config.caches.stories.clone(), stories),
            comments: Cache::new(config.caches.comments.clone(), comments),
        }
    }

    pub async fn story(&self, id: u32) -> Result<Arc<Story>, FetchError> {
        let (source, result) = self.stories.get(id).await;
        tracing::debug!(id, %source, "Loaded story");
        result
    }

    /// Loads the first `limit` stories of `list`, all at once.
    ///
    /// Stories that fail to load are logged and left out, so the result can be shorter than
    /// `limit` even if the list is not.
    pub async fn stories(
        &self,
        list: StoryList,
        limit: usize,
    ) -> Result<Vec<Arc<Story>>, FetchError> {
        let (source, ids) = self.lists.get(list).await;
        let ids = ids?;
        tracing::debug!(%list, %source, count = ids.len(), "Loaded story list");

        let loads = ids.iter().take(limit).map(|&id| async move {
            self.story(id)
                .await
                .inspect_err(|err| tracing::warn!(id, error = %err, "Failed to load story"))
                .ok()
        });
        let stories = future::join_all(loads).await.into_iter().flatten().collect();

        Ok(stories)
    }

    pub async fn comment(&self, id: u32) -> Result<Arc<Comment>, FetchError> {
        let (source, result) = self.comments.get(id).await;
        tracing::debug!(id, %source, "Loaded comment");
        result
    }

    /// Loads the comments with the given `ids`, keeping their order.
    ///
    /// Like [`stories`](Self::stories), this leaves out comments that fail to load.
    pub async fn comments(&self, ids: &[u32]) -> Vec<Arc<Comment>> {
        let loads = ids.iter().map(|&id| async move {
            self.comment(id)
                .await
                .inspect_err(|err| tracing::warn!(id, error = %err, "Failed to load comment"))
                .ok()
        });
        future::join_all(loads).await.into_iter().flatten().collect()
    }

    /// Reports how many values each cache holds.
    pub fn log_stats(&self) {
        for (name, len, in_flight) in [
            (self.lists.name(), self.lists.len(), self.lists.in_flight()),
            (
                self.stories.name(),
                self.stories.len(),
                self.stories.in_flight(),
            ),
            (
                self.comments.name(),
                self.comments.len(),
                self.comments.in_flight(),
            ),
        ] {
            tracing::debug!(cache = name, len, in_flight, "Cache stats");
        }
    }
}

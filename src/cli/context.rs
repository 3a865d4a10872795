//! Shared startup context
//!
//! Loads the configuration, creates the REST client, makes sure the
//! required attributes exist and opens the persisted stores.

use mergebot::api::{MergebotApi, RestApi, find};
use mergebot::config::BotConfig;
use mergebot::error::{Error, Result};
use mergebot::storage::{self, BranchQueue, ReviewStore};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Everything the bot shares between the event side and the worker
pub struct BotContext {
    /// Validated configuration
    pub config: Arc<BotConfig>,
    /// Server client
    pub api: Arc<dyn MergebotApi>,
    /// Pending branches
    pub queue: Arc<BranchQueue>,
    /// Tracked code reviews
    pub reviews: Arc<ReviewStore>,
}

impl BotContext {
    /// Build the context for `bot_name`
    pub async fn new(
        config_path: &Path,
        rest_api_url: &str,
        bot_name: &str,
        data_dir: &Path,
    ) -> Result<Self> {
        let config = BotConfig::load(config_path)?;
        info!(repository = %config.repository, server = %config.server, "configuration loaded");

        let api: Arc<dyn MergebotApi> =
            Arc::new(RestApi::new(rest_api_url, config.api_key.clone())?);

        ensure_attribute(api.as_ref(), bot_name, &config.repository, &config.status_attribute().name)
            .await?;
        ensure_attribute(api.as_ref(), bot_name, &config.repository, &config.merge_to_attribute)
            .await?;

        fs::create_dir_all(data_dir)?;
        let queue = BranchQueue::open(storage::queue_path(data_dir, bot_name))?;
        let reviews = ReviewStore::open(storage::reviews_path(data_dir, bot_name))?;

        Ok(Self {
            config: Arc::new(config),
            api,
            queue: Arc::new(queue),
            reviews: Arc::new(reviews),
        })
    }
}

/// Create the attribute unless the repository already has it
async fn ensure_attribute(
    api: &dyn MergebotApi,
    bot_name: &str,
    repository: &str,
    attribute: &str,
) -> Result<()> {
    if find::exists_attribute_name(api, repository, attribute).await? {
        return Ok(());
    }

    info!(attribute, repository, "creating attribute");
    let comment = format!("Attribute automatically created by mergebot: {bot_name}");
    if api.create_attribute(repository, attribute, &comment).await? {
        return Ok(());
    }

    Err(Error::Config(format!(
        "mergebot [{bot_name}] wasn't able to configure the required attribute [{attribute}] \
         on repository [{repository}]"
    )))
}

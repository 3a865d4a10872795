//! Run command - start the bot and serve events until killed

use crate::cli::context::BotContext;
use mergebot::config::Timings;
use mergebot::error::Result;
use mergebot::events::EventDispatcher;
use mergebot::process::BranchProcessor;
use mergebot::transport::{EventTransport, subscriptions};
use mergebot::worker::{Worker, load_branches_to_process, run_worker};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Options for running the bot
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Event server URL
    pub websocket_url: String,
    /// REST API base URL
    pub rest_api_url: String,
    /// API key for the event server
    pub api_key: String,
    /// Bot name
    pub bot_name: String,
    /// Configuration file
    pub config_path: PathBuf,
    /// State directory
    pub data_dir: PathBuf,
}

/// `<data dir>/mergebot`, or the working directory when there is none
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("mergebot"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Start the worker and feed it events until the process is killed
pub async fn run_bot(options: RunOptions) -> Result<()> {
    let bot_name = options.bot_name.as_str();
    info!(bot = bot_name, "starting mergebot");

    let ctx = BotContext::new(
        &options.config_path,
        &options.rest_api_url,
        bot_name,
        &options.data_dir,
    )
    .await?;

    if let Err(e) =
        load_branches_to_process(ctx.api.as_ref(), &ctx.config, &ctx.queue, &ctx.reviews).await
    {
        error!(
            bot = bot_name,
            error = %e,
            "couldn't load the branches to process on startup"
        );
        return Err(e);
    }

    let timings = Timings::default();
    let processor = BranchProcessor::new(
        Arc::clone(&ctx.api),
        Arc::clone(&ctx.config),
        Arc::clone(&ctx.reviews),
        bot_name,
        timings,
    );
    let worker = Worker::new(Arc::clone(&ctx.api), Arc::clone(&ctx.queue), processor, timings);
    tokio::spawn(run_worker(worker));

    let transport = EventTransport::new(
        &options.websocket_url,
        bot_name,
        &options.api_key,
        subscriptions(&ctx.config),
    )?;
    let dispatcher = EventDispatcher::new(ctx.config, ctx.queue, ctx.reviews);
    transport.run(&dispatcher).await;

    Ok(())
}

/* Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

use anyhow::{Context, bail};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use nsqkit::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML file with `[producer]` and `[consumer]` sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for the client and its connections
    #[arg(short, long, global = true, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish one or more messages
    Publish(PublishArgs),
    /// Subscribe topics and log every message received
    Tail(TailArgs),
}

#[derive(Args, Debug)]
struct PublishArgs {
    #[arg(short, long)]
    topic: String,

    /// nsqd address, overrides `[producer] nsqd`
    #[arg(long)]
    nsqd: Option<String>,

    /// Delay delivery by the given number of seconds
    #[arg(long)]
    delay_seconds: Option<u64>,

    /// Messages to publish, more than one is sent as a single batch
    #[arg(required = true)]
    messages: Vec<String>,
}

#[derive(Args, Debug)]
struct TailArgs {
    /// Topics to subscribe
    #[arg(short, long = "topic", required = true)]
    topics: Vec<String>,

    /// Channel name, overrides `[consumer] channel`
    #[arg(long)]
    channel: Option<String>,

    /// nsqd addresses, added to `[consumer] nsqd`
    #[arg(long)]
    nsqd: Vec<String>,

    /// nsqlookupd addresses, added to `[consumer] nsqlookupd`
    #[arg(long)]
    lookupd: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.debug { "DEBUG" } else { "INFO" };
    Registry::default()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(default_level)))
        .init();

    let config = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Cannot load configuration from: {}", path.display()))?,
        None => ClientConfig::default(),
    };

    match cli.command {
        Command::Publish(args) => publish(&config, args, cli.debug).await,
        Command::Tail(args) => tail(&config, args, cli.debug).await,
    }
}

async fn publish(config: &ClientConfig, args: PublishArgs, debug: bool) -> anyhow::Result<()> {
    let mut section = config.producer();
    if let Some(nsqd) = args.nsqd {
        section.insert("nsqd", nsqd);
    }

    let mut producer = Producer::new();
    producer.init(&section, debug)?;
    producer.run()?;

    let count = args.messages.len();
    let result = match (args.delay_seconds, count) {
        (Some(delay), _) => {
            let mut result = Ok(());
            for message in args.messages {
                result = producer.deferred_publish(&args.topic, message, delay).await;
                if result.is_err() {
                    break;
                }
            }
            result
        }
        (None, 1) => producer.publish(&args.topic, args.messages[0].as_str()).await,
        (None, _) => producer.multi_publish(&args.topic, args.messages).await,
    };
    producer.stop().await;

    result.with_context(|| format!("Cannot publish to topic: {}", args.topic))?;
    info!("Published {count} message(s) to topic: {}", args.topic);
    Ok(())
}

async fn tail(config: &ClientConfig, args: TailArgs, debug: bool) -> anyhow::Result<()> {
    let mut registry = ConsumerRegistry::new();
    registry.init(&config.consumer(), debug)?;
    if let Some(channel) = args.channel {
        registry.set_channel_name(&channel);
    }
    if registry.channel_name().is_empty() {
        bail!("A channel is required, use --channel or `[consumer] channel`");
    }
    for nsqd in &args.nsqd {
        registry.set_nsqd_address(nsqd);
    }
    for lookupd in &args.lookupd {
        registry.set_lookupd_address(lookupd);
    }

    for topic in &args.topics {
        let name: Arc<str> = Arc::from(topic.as_str());
        registry.add_handler(
            topic,
            Arc::new(move |body: Bytes, delivery: Delivery| {
                let topic = name.clone();
                async move {
                    info!(
                        "[{topic}] {} (attempt: {}, nsqd: {}): {}",
                        delivery.id,
                        delivery.attempts,
                        delivery.nsqd_address,
                        String::from_utf8_lossy(&body)
                    );
                    HandlerDecision::Finish
                }
            }),
        )?;
    }

    registry.run()?;
    info!("Tailing topic(s): {:?}, press Ctrl+C to stop", registry.topics());
    tokio::signal::ctrl_c()
        .await
        .context("Cannot listen for Ctrl+C")?;
    registry.stop_all().await;
    Ok(())
}

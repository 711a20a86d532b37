use std::collections::HashMap;
use std::env;
use std::error::Error;

use hashflow_core::{PipelineConfig, RedisClient, RedisConfig, StoreClient, WritePolicy, ping};
use tokio::io::{BufReader, Stdin};
use tracing::{error, info};

mod cmdline;
mod commands;
mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    if let Err(e) = run().await {
        error!("{e}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let matches = cmdline::root_cli().get_matches();

    let env_vars: HashMap<String, String> = env::vars().collect();
    let mut redis_config = RedisConfig::load(env_vars.clone())?;
    if let Some(url) = matches.get_one::<String>("url") {
        redis_config.url = url.clone();
    }
    let mut pipeline_config = PipelineConfig::load(env_vars)?;
    if let Some(capacity) = matches.get_one::<usize>("capacity") {
        pipeline_config = pipeline_config.with_channel_capacity(*capacity);
        pipeline_config.validate()?;
    }

    let client = RedisClient::connect(redis_config).await?;
    if !ping(&client).await {
        return Err("Redis is not ready".into());
    }

    let result = match matches.subcommand() {
        Some(("write", args)) => {
            if args.get_flag("fail-fast") {
                pipeline_config = pipeline_config.with_write_policy(WritePolicy::FailFast);
            }
            commands::write(&client, pipeline_config, stdin()).await
        }
        Some(("read", args)) => {
            let format = args
                .get_one::<String>("format")
                .map(String::as_str)
                .unwrap_or(cmdline::FORMAT_JSON);
            let keys = values(args, "keys");
            commands::read(&client, pipeline_config, format, keys, stdin()).await
        }
        Some(("del", args)) => commands::delete(&client, values(args, "keys")).await,
        Some(("exec", args)) => commands::exec(&client, values(args, "command")).await,
        Some((other, _)) => Err(format!("unknown subcommand {other}").into()),
        None => Err("missing subcommand".into()),
    };

    client.close().await?;
    result
}

fn stdin() -> BufReader<Stdin> {
    BufReader::new(tokio::io::stdin())
}

fn values(args: &clap::ArgMatches, id: &str) -> Vec<String> {
    args.get_many::<String>(id)
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

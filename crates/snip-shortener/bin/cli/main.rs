mod cli;

use crate::cli::{Command, CLI};
use anyhow::Context;
use clap::Parser;
use snip_shortener::{ShortId, ShortenerService, StorageFactory, UserTokenSigner};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::try_parse()?;
    init_tracing(config.log_json);

    let storage_config = config.storage_config();
    info!(
        storage_backend = %storage_config.backend_kind(),
        base_url = %config.base_url,
        "starting snip"
    );

    let storage = StorageFactory::build(&storage_config)
        .await
        .context("failed to build storage")?;
    let service = ShortenerService::new(storage, config.base_url.clone());

    let result = run(&service, &config).await;
    service.shutdown().await;
    result
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(service: &ShortenerService, config: &CLI) -> anyhow::Result<()> {
    match &config.command {
        Command::Shorten { url, user } => {
            let link = service.shorten(url, *user).await?;
            println!("{}", link.short_url);
        }
        Command::Resolve { id } => {
            println!("{}", service.resolve(&ShortId::new(id.as_str())).await?);
        }
        Command::Links { user } => {
            for link in service.user_links(*user).await? {
                println!("{}\t{}", link.short_url, link.original_url);
            }
        }
        Command::Delete { user, ids } => {
            let ids = ids.iter().map(|id| ShortId::new(id.as_str())).collect();
            service.delete_user_links(*user, ids).await?;
        }
        Command::NewUser => match &config.secret_key {
            Some(secret) => {
                let signer = UserTokenSigner::new(secret)?;
                let identity = service.identify(&signer, None).await?;
                println!("{}\t{}", identity.user, identity.token);
            }
            None => println!("{}", service.new_user().await?),
        },
        Command::Ping => {
            service.ping().await?;
            println!("ok");
        }
        Command::Stats => {
            let stats = service.stats().await?;
            println!("urls\t{}", stats.urls);
            println!("users\t{}", stats.users);
        }
    }
    Ok(())
}

use clap::Parser;
use redis_lite::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    redis_lite::init_tracing();
    redis_lite::run(Config::parse()).await
}

use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "downlink")]
#[command(about = "downlink download orchestration service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Server(ServerArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to (overrides the config file)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

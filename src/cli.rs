use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Load the models, connect to the indexes and serve the HTTP API
    Serve {
        /// Address to listen on, overrides BIND_ADDR
        #[clap(short, long)]
        bind: Option<String>,
    },

    /// Print the effective settings as YAML
    Settings {},
}

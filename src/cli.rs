use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

/// payrelay — multi-server payment proxy registry and selector
#[derive(Parser)]
#[command(name = "payrelay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the admin API server
    Serve {
        /// Port to bind
        #[arg(short, long, default_value = "8088")]
        port: u16,
    },

    /// Manage payment proxy servers
    Server {
        #[command(subcommand)]
        command: ServerCommands,
    },
}

#[derive(Subcommand)]
pub enum ServerCommands {
    /// Register a new proxy server
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "")]
        api_key: String,
        #[arg(long, default_value = "")]
        api_secret: String,
        /// Monetary ceiling this server may process before failover
        #[arg(long)]
        capacity: Decimal,
        #[arg(long, default_value = "10")]
        priority: i32,
        /// Comma-separated remote product ids
        #[arg(long)]
        products: Option<String>,
    },
    /// List registered servers
    List,
    /// Show one server
    Show { id: i64 },
    /// Update fields on a server (omitted flags stay unchanged)
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        capacity: Option<Decimal>,
        #[arg(long)]
        priority: Option<i32>,
        #[arg(long)]
        active: Option<bool>,
    },
    /// Delete a server
    Remove { id: i64 },
    /// Pin the selected pointer to a server
    Select { id: i64 },
    /// Reset a server's usage counter to zero
    ResetUsage { id: i64 },
}

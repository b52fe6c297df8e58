use clap::{Parser, Subcommand};

/// Command-line interface definition for rguestlog
/// Guest check-in server with per-division occupancy and contact tracing
#[derive(Parser, Debug)]
#[command(
    name = "rguestlog",
    version = env!("CARGO_PKG_VERSION"),
    about = "Guest check-in server: scanning devices, per-division occupancy and contact tracing on SQLite",
    long_about = None
)]
pub struct Cli {
    /// Path of the configuration file (default: ~/.rguestlog/rguestlog.conf)
    #[arg(global = true, long = "config", value_name = "FILE")]
    pub config: Option<String>,

    /// Override database path
    #[arg(global = true, long = "db", value_name = "FILE")]
    pub db: Option<String>,

    /// Override the log level (trace, debug, info, warn, error)
    #[arg(global = true, long = "log-level")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create configuration, database and keypair, and the reserved admin account
    Init {
        /// Division names, comma separated, in display order
        #[arg(long = "divisions", value_delimiter = ',')]
        divisions: Option<Vec<String>>,

        #[arg(long = "admin-user", default_value = "admin")]
        admin_user: String,

        #[arg(long = "admin-password", help = "Password of the reserved admin account")]
        admin_password: String,

        /// Overwrite an existing configuration file
        #[arg(long = "force")]
        force: bool,
    },

    /// Run the HTTP/WebSocket server and the scheduler
    Serve {
        #[arg(long = "address", help = "Listen address (overrides http.address)")]
        address: Option<String>,

        #[arg(long = "port", help = "Listen port (overrides http.port)")]
        port: Option<u16>,
    },

    /// Run the cleanup pipeline once: force checkout, then retention purge
    Cleanup {
        #[arg(long = "checkout-only", conflicts_with = "purge_only")]
        checkout_only: bool,

        #[arg(long = "purge-only")]
        purge_only: bool,
    },

    /// Manage staff accounts
    Staff {
        #[command(subcommand)]
        action: StaffAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum StaffAction {
    /// Create a staff account
    Add {
        username: String,

        #[arg(long = "password")]
        password: String,

        /// Bind the account to one division (index); unbound accounts work everywhere
        #[arg(long = "division")]
        division: Option<usize>,

        #[arg(long = "admin")]
        admin: bool,
    },

    /// List staff accounts
    List,

    /// Change division binding, admin flag or active flag of an account
    Update {
        id: i64,

        /// Bind the account to one division (index)
        #[arg(long = "division", conflicts_with = "unbind")]
        division: Option<usize>,

        /// Let the account work on every division
        #[arg(long = "unbind")]
        unbind: bool,

        #[arg(long = "admin", value_name = "BOOL")]
        admin: Option<bool>,

        #[arg(long = "active", value_name = "BOOL")]
        active: Option<bool>,
    },

    /// Set a new password for an account
    Passwd {
        id: i64,

        #[arg(long = "password")]
        password: String,
    },

    /// Delete a staff account by id
    Del {
        id: i64,

        /// Skip the confirmation prompt
        #[arg(long = "yes", short = 'y')]
        yes: bool,
    },
}

//! CLI argument definitions using clap derive macros.

use clap::{Parser, Subcommand};

use rswift_core::{DEFAULT_RETRIES, DEFAULT_THREADS};

/// Concurrent command-line client for Swift-style object storage.
///
/// rswift turns coarse intents (delete this container, upload this tree)
/// into parallel fan-outs of storage requests, streaming per-object
/// progress as it goes.
#[derive(Parser, Debug)]
#[command(name = "rswift")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Preauthorised storage endpoint (https://host/v1/AUTH_account)
    #[arg(long, env = "OS_STORAGE_URL", global = true)]
    pub os_storage_url: Option<String>,

    /// Preauthorised auth token
    #[arg(long, env = "OS_AUTH_TOKEN", global = true)]
    pub os_auth_token: Option<String>,

    /// Retry budget per request (0-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_RETRIES, value_parser = clap::value_parser!(u32).range(0..=10), global = true)]
    pub retries: u32,

    /// Worker count per pool (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_THREADS as u8, value_parser = clap::value_parser!(u8).range(1..=100), global = true)]
    pub concurrency: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List containers, or the objects in a container
    List {
        container: Option<String>,
        /// Only names starting with this prefix
        #[arg(short, long)]
        prefix: Option<String>,
        /// Attach metadata to account listings
        #[arg(short, long)]
        long: bool,
    },
    /// Show headers of the account, a container, or objects
    Stat {
        container: Option<String>,
        objects: Vec<String>,
    },
    /// Download objects, a container, or the whole account
    Download {
        container: Option<String>,
        objects: Vec<String>,
        /// Write a single object to this file
        #[arg(short = 'o', long)]
        output: Option<String>,
        /// Directory to place downloads in
        #[arg(short = 'D', long)]
        output_dir: Option<String>,
        /// Only objects starting with this prefix
        #[arg(short, long)]
        prefix: Option<String>,
        /// Strip the prefix from local file names
        #[arg(long)]
        remove_prefix: bool,
        /// Skip objects whose local copy is already identical
        #[arg(long)]
        skip_identical: bool,
    },
    /// Upload files to a container
    Upload {
        container: String,
        files: Vec<String>,
        /// Split sources of at least this many bytes into segments
        #[arg(short = 'S', long)]
        segment_size: Option<String>,
        /// Store the manifest as a static large object
        #[arg(long)]
        use_slo: bool,
        /// Container for segments (default <container>_segments)
        #[arg(long)]
        segment_container: Option<String>,
        /// Keep superseded segments of overwritten large objects
        #[arg(long)]
        leave_segments: bool,
        /// Skip files whose remote copy is already identical
        #[arg(long)]
        skip_identical: bool,
        /// Only upload files that changed since the last upload
        #[arg(long)]
        changed: bool,
        /// Extra headers as Name:Value
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
    /// Delete objects, or a whole container
    Delete {
        container: String,
        objects: Vec<String>,
        /// Keep the segments of deleted large objects
        #[arg(long)]
        leave_segments: bool,
    },
    /// Update metadata on the account, a container, or objects
    Post {
        container: Option<String>,
        objects: Vec<String>,
        /// Metadata items as Name:Value
        #[arg(short = 'm', long = "meta")]
        meta: Vec<String>,
        /// Extra headers as Name:Value
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
    /// Server-side copy of objects
    Copy {
        container: String,
        objects: Vec<String>,
        /// Destination as /container[/object]
        #[arg(short, long)]
        destination: Option<String>,
        /// Replace instead of merging metadata
        #[arg(long)]
        fresh_metadata: bool,
    },
}

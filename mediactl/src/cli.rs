use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "mediactl",
    version,
    about = "Inspect IPFS gateway resolution and the media cache",
    long_about = "Diagnostic tool for the client-side media layer.\n\
                  \n\
                  Resolves CIDs to gateway URLs, probes gateway health, shows how the\n\
                  cache manager would classify a request, fetches content through a\n\
                  cache worker with gateway fallback, and inspects or purges a\n\
                  file-backed cache."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// Override the cache storage directory (switches to file storage)
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build gateway URLs for a CID
    Resolve {
        /// Content identifier
        cid: String,

        /// Number of candidate URLs to build (1 prints a single URL)
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        /// Gateway base URL to try first
        #[arg(short, long)]
        gateway: Option<String>,

        /// Use the same-origin proxy (single URL) or append it last (list)
        #[arg(short, long)]
        proxy: bool,
    },

    /// List configured gateways in priority order
    Gateways {
        /// Print one uniformly random gateway instead
        #[arg(long)]
        random: bool,
    },

    /// Check which gateways answer the probe CID
    Probe {
        /// Only probe the named gateway
        #[arg(short, long)]
        gateway: Option<String>,

        /// Probe timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Show the traffic class and caching strategy of a request
    Classify {
        url: String,

        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Extra request header, `Name: value`; repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },

    /// Fetch a URL, or a CID with gateway fallback, through a cache worker
    Fetch {
        /// Absolute URL or CID
        target: String,

        /// Candidate URLs to try for a CID
        #[arg(short = 'n', long, default_value = "4")]
        count: usize,

        /// Bypass the cache worker and go straight to the network
        #[arg(long)]
        no_worker: bool,

        /// Write the body to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect or purge cache partitions
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List partitions and their entries
    List {
        /// Print every cached request, not just counts
        #[arg(short, long)]
        entries: bool,
    },

    /// Delete partitions that do not belong to the configured version
    Purge {
        /// Delete every partition, including the current version's
        #[arg(long)]
        all: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolve() {
        let args = CliArgs::parse_from(["mediactl", "resolve", "bafy", "-n", "3", "--proxy"]);
        match args.command {
            Command::Resolve {
                cid, count, proxy, ..
            } => {
                assert_eq!(cid, "bafy");
                assert_eq!(count, 3);
                assert!(proxy);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = CliArgs::parse_from([
            "mediactl",
            "cache",
            "purge",
            "--all",
            "--verbose",
            "--cache-dir",
            "/tmp/cache",
        ]);
        assert!(args.verbose);
        assert_eq!(args.cache_dir, Some(PathBuf::from("/tmp/cache")));
        assert!(matches!(
            args.command,
            Command::Cache {
                action: CacheAction::Purge { all: true }
            }
        ));
    }

    #[test]
    fn test_repeated_headers() {
        let args = CliArgs::parse_from([
            "mediactl",
            "classify",
            "https://ipfs.io/ipfs/bafy",
            "-H",
            "Range: bytes=0-",
            "-H",
            "Accept: audio/mpeg",
        ]);
        let Command::Classify { headers, method, .. } = args.command else {
            panic!("expected classify");
        };
        assert_eq!(method, "GET");
        assert_eq!(headers.len(), 2);
    }
}

use clap::{Parser, Subcommand};

/// Enforce per-user memory limits on a shared node.
///
/// Each invocation performs a single action; schedule `scan` from cron or a
/// systemd timer to run it periodically.
#[derive(Parser, Debug)]
#[command(name = "usage-monitor", version, about)]
pub struct CliArgs {
    /// Configuration profile; keys are read as `{PROFILE}_{KEY}` first.
    #[arg(long, env = "NANNY_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Print results as JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Run one enforcement pass over every user on this node.
    Scan {
        /// Memory limit per user, in percent of host memory.
        #[arg(long)]
        limit: Option<f64>,

        /// Never signal processes using less than this percentage.
        #[arg(long = "min-mem")]
        min_process_percent: Option<f64>,

        /// Seconds a user may stay over the limit before being enforced on.
        #[arg(short, long)]
        wait: Option<u64>,

        /// Record violations without emailing users.
        #[arg(long)]
        quiet: bool,
    },

    /// Enforce the memory limit on a single user.
    Kill {
        #[arg(short, long)]
        user: String,

        /// Node to evaluate; defaults to this host.
        #[arg(short, long)]
        node: Option<String>,

        #[arg(long)]
        limit: Option<f64>,

        #[arg(long)]
        quiet: bool,
    },

    /// Show past notifications, newest first.
    History {
        #[arg(short, long)]
        user: Option<String>,

        /// Only show notifications issued for this limit.
        #[arg(long)]
        limit: Option<f64>,
    },

    /// List whitelist entries currently in effect.
    Whitelist,

    /// Exempt a user on a node, or everyone with --global.
    ///
    /// Adding again for the same user and node replaces the earlier entry.
    Add {
        #[arg(short, long, required_unless_present = "global", conflicts_with = "global")]
        user: Option<String>,

        #[arg(short, long, required_unless_present = "global", conflicts_with = "global")]
        node: Option<String>,

        /// Length of the exemption in seconds; 0 is permanent.
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        duration: i64,

        #[arg(long)]
        global: bool,
    },

    /// Delete whitelist entries for a user on a node, or all global entries.
    Remove {
        #[arg(short, long, required_unless_present = "global", conflicts_with = "global")]
        user: Option<String>,

        #[arg(short, long, required_unless_present = "global", conflicts_with = "global")]
        node: Option<String>,

        #[arg(long)]
        global: bool,
    },

    /// Print the resolved configuration with secrets removed.
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn kill_flags() {
        let args = CliArgs::try_parse_from([
            "usage-monitor", "kill", "-u", "alice", "-n", "login1", "--limit", "50", "--quiet",
        ])
        .unwrap();
        assert_eq!(
            args.command,
            Command::Kill {
                user: "alice".into(),
                node: Some("login1".into()),
                limit: Some(50.0),
                quiet: true,
            }
        );
    }

    #[test]
    fn add_accepts_negative_duration_for_validation_downstream() {
        let args = CliArgs::try_parse_from([
            "usage-monitor", "add", "-u", "bob", "-n", "login1", "-d", "-5",
        ])
        .unwrap();
        assert!(matches!(args.command, Command::Add { duration: -5, .. }));
    }

    #[test]
    fn scoped_add_requires_node() {
        assert!(CliArgs::try_parse_from(["usage-monitor", "add", "-u", "bob"]).is_err());
        assert!(CliArgs::try_parse_from(["usage-monitor", "add", "-n", "login1"]).is_err());
        assert!(CliArgs::try_parse_from(["usage-monitor", "add", "--global"]).is_ok());
    }

    #[test]
    fn global_conflicts_with_user_and_node() {
        use clap::error::ErrorKind;

        for argv in [
            vec!["usage-monitor", "add", "-u", "bob", "--global"],
            vec!["usage-monitor", "add", "-n", "login1", "--global"],
            vec!["usage-monitor", "remove", "-u", "carol", "--global"],
            vec!["usage-monitor", "remove", "-u", "carol", "-n", "login1", "--global"],
        ] {
            let err = CliArgs::try_parse_from(argv.clone()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ArgumentConflict, "{argv:?}");
        }
        assert!(CliArgs::try_parse_from(["usage-monitor", "remove", "--global"]).is_ok());
    }

    #[test]
    fn scan_wait_flag() {
        let args = CliArgs::try_parse_from(["usage-monitor", "scan", "-w", "10"]).unwrap();
        assert!(matches!(args.command, Command::Scan { wait: Some(10), .. }));
        let args = CliArgs::try_parse_from(["usage-monitor", "scan"]).unwrap();
        assert!(matches!(args.command, Command::Scan { wait: None, .. }));
    }

    #[test]
    fn json_flag_is_global() {
        let args = CliArgs::try_parse_from(["usage-monitor", "history", "--json"]).unwrap();
        assert!(args.json);
    }
}

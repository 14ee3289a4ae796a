use clap::Parser;

use crate::build_info;

#[derive(Parser, Debug)]
#[command(
    about = "Government-data import worker",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    #[clap(long, default_value = "0.0.0.0:3000")]
    /// Bind address for the admin/metrics HTTP server
    pub bind: String,

    #[clap(long = "log-level", default_value = "info")]
    pub log_level: String,

    #[clap(long = "skip-migrations", default_value_t = false)]
    /// Do not run pending database migrations on startup
    pub skip_migrations: bool,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use crate::build_info;
    use clap::{error::ErrorKind, Parser};

    #[test]
    fn version_short_circuits_other_flags() {
        let err = Cli::try_parse_from(["govdata_worker", "--version", "--no-such-flag"])
            .expect_err("expected clap to stop parsing after --version");

        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
        assert!(
            err.to_string().contains(build_info::VERSION_WITH_COMMIT),
            "version output should include semver+commit hash"
        );
    }

    #[test]
    fn defaults_are_applied() {
        let cli = Cli::try_parse_from(["govdata_worker"]).expect("defaults should parse");
        assert_eq!(cli.bind, "0.0.0.0:3000");
        assert_eq!(cli.log_level, "info");
        assert!(!cli.skip_migrations);
    }
}

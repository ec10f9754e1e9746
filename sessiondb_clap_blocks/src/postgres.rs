//! Postgres connection config.

use std::time::Duration;

use sessiondb_write::store::postgres::PostgresConnectionOptions;

fn default_max_connections() -> &'static str {
    let s = PostgresConnectionOptions::DEFAULT_MAX_CONNS.to_string();
    Box::leak(Box::new(s))
}

fn default_connect_timeout() -> &'static str {
    let s =
        humantime::format_duration(PostgresConnectionOptions::DEFAULT_CONNECT_TIMEOUT).to_string();
    Box::leak(Box::new(s))
}

/// CLI config for the Postgres store.
#[derive(Debug, Clone, clap::Parser)]
pub struct PostgresConfig {
    /// Postgres connection string, e.g. `postgresql://postgres@localhost:5432/sessions`.
    #[clap(long = "postgres-dsn", env = "SESSIONDB_POSTGRES_DSN", action)]
    pub dsn: String,

    /// Maximum number of connections to Postgres at any one time.
    #[clap(
        long = "postgres-max-conns",
        env = "SESSIONDB_POSTGRES_MAX_CONNS",
        default_value = default_max_connections(),
        action,
    )]
    pub max_conns: u32,

    /// Set the amount of time to attempt connecting to the database.
    #[clap(
        long = "postgres-connect-timeout",
        env = "SESSIONDB_POSTGRES_CONNECT_TIMEOUT",
        default_value = default_connect_timeout(),
        value_parser = humantime::parse_duration,
    )]
    pub connect_timeout: Duration,

    /// Application name reported to Postgres.
    #[clap(
        long = "postgres-app-name",
        env = "SESSIONDB_POSTGRES_APP_NAME",
        default_value = PostgresConnectionOptions::DEFAULT_APP_NAME,
        action,
    )]
    pub app_name: String,
}

impl PostgresConfig {
    pub fn connection_options(&self) -> PostgresConnectionOptions {
        PostgresConnectionOptions {
            app_name: self.app_name.clone(),
            dsn: self.dsn.clone(),
            max_conns: self.max_conns,
            connect_timeout: self.connect_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults() {
        let config =
            PostgresConfig::parse_from(["sessiondb", "--postgres-dsn", "postgresql://localhost/db"]);
        let options = config.connection_options();

        assert_eq!(options.dsn, "postgresql://localhost/db");
        assert_eq!(options.max_conns, 10);
        assert_eq!(options.connect_timeout, Duration::from_secs(2));
        assert_eq!(options.app_name, "sessiondb");
    }

    #[test]
    fn dsn_is_required() {
        assert!(PostgresConfig::try_parse_from(["sessiondb"]).is_err());
    }
}

// Connections to the application database
//
// DbConnector is the seam between the installer and a real database server; tests use stub
// connectors so the success and failure paths run without one.

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{MySql, Pool, Postgres};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::InstallerError;
use crate::utils::logging::mask_dsn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    MySql,
    Postgres,
}

impl Driver {
    /// Name used in the application's configuration (`DB_CONNECTION`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::MySql => "mysql",
            Driver::Postgres => "pgsql",
        }
    }

    pub fn default_charset(&self) -> &'static str {
        match self {
            Driver::MySql => "utf8mb4",
            Driver::Postgres => "utf8",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Driver::MySql => 3306,
            Driver::Postgres => 5432,
        }
    }
}

impl FromStr for Driver {
    type Err = InstallerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Driver::MySql),
            "pgsql" | "postgres" | "postgresql" => Ok(Driver::Postgres),
            other => Err(InstallerError::UnsupportedDriver(other.to_string())),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named set of connection parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub driver: Driver,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub charset: String,
    pub prefix: String,
}

impl ConnectionProfile {
    pub fn new(
        driver: Driver,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            driver,
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: password.into(),
            charset: driver.default_charset().to_string(),
            prefix: String::new(),
        }
    }

    /// Connection target without credentials, safe to log.
    pub fn masked(&self) -> String {
        mask_dsn(
            self.driver.as_str(),
            &self.host,
            self.port,
            &self.database,
            &self.username,
        )
    }
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("charset", &self.charset)
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Failed connection attempt: what the operator is told, and what goes to the log.
#[derive(Debug, Clone)]
pub struct ConnectError {
    /// Shown to the operator.
    pub user_message: String,
    /// Driver error with the masked target; never contains the password.
    pub internal_details: String,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message)
    }
}

impl std::error::Error for ConnectError {}

impl ConnectError {
    pub fn timed_out() -> Self {
        ConnectError {
            user_message: "The database server did not answer in time. Check the host, port and firewall."
                .to_string(),
            internal_details: "connect timed out".to_string(),
        }
    }
}

/// An open connection (or pool) registered for a profile.
#[async_trait]
pub trait LiveConnection: Send + Sync {
    /// Close every underlying connection; the handle must not be used afterwards.
    async fn close(&self);
}

/// Opens connections for profiles. `RealDbConnector` talks to a server; tests stub it.
#[async_trait]
pub trait DbConnector: Send + Sync {
    /// Open a connection for `profile`.
    async fn connect(&self, profile: &ConnectionProfile)
        -> Result<Box<dyn LiveConnection>, ConnectError>;

    /// Upper bound for a single attempt.
    fn timeout_duration(&self) -> Duration {
        Duration::from_secs(20)
    }
}

/// Connect through `connector`, bounded by its timeout.
pub async fn connect_with_timeout(
    connector: &dyn DbConnector,
    profile: &ConnectionProfile,
) -> Result<Box<dyn LiveConnection>, ConnectError> {
    match timeout(connector.timeout_duration(), connector.connect(profile)).await {
        Ok(result) => result,
        Err(_) => Err(ConnectError::timed_out()),
    }
}

/// Database connection pool for either supported engine.
#[derive(Clone)]
pub enum DatabaseConnection {
    MySql(Pool<MySql>),
    Postgres(Pool<Postgres>),
}

#[async_trait]
impl LiveConnection for DatabaseConnection {
    async fn close(&self) {
        match self {
            DatabaseConnection::MySql(pool) => pool.close().await,
            DatabaseConnection::Postgres(pool) => pool.close().await,
        }
    }
}

/// sqlx-backed connector; every attempt opens a small pool.
pub struct RealDbConnector {
    timeout: Duration,
    max_connections: u32,
}

impl RealDbConnector {
    pub fn new(timeout: Duration, max_connections: u32) -> Self {
        Self {
            timeout,
            max_connections: max_connections.max(1),
        }
    }

    fn mysql_options(profile: &ConnectionProfile) -> MySqlConnectOptions {
        let mut opts = MySqlConnectOptions::new()
            .host(&profile.host)
            .port(profile.port)
            .username(&profile.username)
            .password(&profile.password)
            .charset(&profile.charset);
        if !profile.database.is_empty() {
            opts = opts.database(&profile.database);
        }
        opts
    }

    fn postgres_options(profile: &ConnectionProfile) -> PgConnectOptions {
        let mut opts = PgConnectOptions::new()
            .host(&profile.host)
            .port(profile.port)
            .username(&profile.username)
            .password(&profile.password)
            .options([("client_encoding", profile.charset.as_str())]);
        if !profile.database.is_empty() {
            opts = opts.database(&profile.database);
        }
        opts
    }
}

#[async_trait]
impl DbConnector for RealDbConnector {
    async fn connect(
        &self,
        profile: &ConnectionProfile,
    ) -> Result<Box<dyn LiveConnection>, ConnectError> {
        // Pool creation opens one connection eagerly, so success means the server accepted us.
        let result = match profile.driver {
            Driver::MySql => MySqlPoolOptions::new()
                .max_connections(self.max_connections)
                .acquire_timeout(self.timeout)
                .connect_with(Self::mysql_options(profile))
                .await
                .map(DatabaseConnection::MySql),
            Driver::Postgres => PgPoolOptions::new()
                .max_connections(self.max_connections)
                .acquire_timeout(self.timeout)
                .connect_with(Self::postgres_options(profile))
                .await
                .map(DatabaseConnection::Postgres),
        };

        match result {
            Ok(conn) => Ok(Box::new(conn)),
            Err(e) => Err(ConnectError {
                user_message: "Could not connect with these settings. Check the host, database name, username and password."
                    .to_string(),
                internal_details: format!("Connection error ({}): {}", profile.masked(), e),
            }),
        }
    }

    fn timeout_duration(&self) -> Duration {
        self.timeout
    }
}

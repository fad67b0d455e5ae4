use thiserror::Error;

/// Errors raised while running statements on an open connection.
#[derive(Debug, Error)]
pub enum DbError {
    /// Low-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Postgres error: {0}")]
    PgError(#[from] tokio_postgres::Error),

    /// The peer is temporarily unable to serve the request.
    #[error("Temporarily unavailable: {0}")]
    Unavailable(String),

    /// A statement was rejected by the database.
    #[error("Query error: {0}")]
    Query(String),

    /// Writing a row failed at the application level.
    #[error("Write error: {0}")]
    Write(String),

    /// A transaction call arrived in the wrong state.
    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Errors happening during connection setup.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Connection failed: {0}")]
    Connection(#[from] tokio_postgres::Error),

    #[error("Invalid connection URL: {0}")]
    InvalidUrl(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(#[from] native_tls::Error),

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

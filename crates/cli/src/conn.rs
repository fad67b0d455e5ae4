use crate::error::CliError;
use connectors::{source::SourceConnector, target::TargetConnector};
use tracing::{error, info};

/// Opens one connection to each side of a job without moving any rows.
pub async fn check_connections(
    source: &dyn SourceConnector,
    target: &dyn TargetConnector,
) -> Result<(), CliError> {
    source.connect().await.map_err(|e| {
        error!(connector = %source.name(), error = %e, "Source connection failed");
        CliError::Connector(e)
    })?;
    info!(connector = %source.name(), "Source reachable");

    target.connect().await.map_err(|e| {
        error!(connector = %target.name(), error = %e, "Target connection failed");
        CliError::Connector(e)
    })?;
    info!(connector = %target.name(), "Target reachable");
    Ok(())
}

//! The caller-facing message stream.
//!
//! A [`Query`] yields the peer's [`Message`](crate::protocol::Message)s in
//! arrival order and exposes the session's control methods.
//!
//! # Example
//!
//! ```no_run
//! use futures::{stream, StreamExt};
//! use claude_query::stream::{Prompt, Query, UserInput};
//! use claude_query::QueryConfig;
//!
//! # async fn example() -> claude_query::Result<()> {
//! let config = QueryConfig::builder().build()?;
//! let mut query = Query::spawn(&config, Prompt::Streaming).await?;
//!
//! query.stream_input(stream::iter(vec![
//!     UserInput::text("Remember the number 7."),
//!     UserInput::text("What number did I ask you to remember?"),
//! ]))?;
//!
//! while let Some(message) = query.next().await {
//!     if let Some(result) = message?.as_result() {
//!         println!("turn done: {:?}", result.result);
//!     }
//! }
//! println!("cost: ${:.4}", query.total_cost_usd().unwrap_or(0.0));
//! # Ok(())
//! # }
//! ```
//!
//! # Cancellation
//!
//! Dropping a [`Query`] will:
//! 1. Stop the background input and stderr tasks
//! 2. Fail outstanding control requests
//! 3. Kill the CLI subprocess

mod control;
mod input;
mod query;

use std::time::Duration;

use tokio::time::timeout as tokio_timeout;

pub use control::QueryController;
pub use input::{Prompt, UserInput};
pub use query::{CollectedResponse, Query, QueryState};

use crate::{Error, Result};

/// Run a future with a timeout.
///
/// Returns [`Error::Timeout`] if the future doesn't complete within the
/// specified duration.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio_timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(duration)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn with_timeout_expires() {
        let result = with_timeout(Duration::from_millis(1), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, Error>(42)
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn with_timeout_inner_error() {
        let result = with_timeout(Duration::from_secs(1), async {
            Err::<i32, _>(Error::InputClosed)
        })
        .await;
        assert!(matches!(result, Err(Error::InputClosed)));
    }
}

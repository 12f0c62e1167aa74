use tracing::debug;

use crate::codec::{Execution, WireCodec};
use crate::error::WireResult;
use crate::stream::reservation::StreamReservation;
use crate::types::{Statement, StatementKind};

/// Picks the execution strategy of a statement.
///
/// Batch parameter sets take precedence over bind values, which take precedence over plain text.
pub fn classify(statement: &Statement) -> StatementKind {
    if !statement.batches().is_empty() {
        StatementKind::Batched
    } else if !statement.parameters().is_empty() {
        StatementKind::Parameterized
    } else {
        StatementKind::Simple
    }
}

/// Sends `statement` with the strategy chosen by [`classify`].
pub(crate) async fn dispatch<C: WireCodec>(
    codec: &C,
    rsv: &mut StreamReservation<C::Stream>,
    statement: &Statement,
) -> WireResult<Execution<C::Continuation>> {
    let kind = classify(statement);
    debug!(?kind, sequence = rsv.sequence(), "dispatching statement");

    let execution = match kind {
        StatementKind::Simple => codec.execute_simple(rsv, statement).await?,
        StatementKind::Parameterized => codec.execute_parameterized(rsv, statement).await?,
        StatementKind::Batched => codec.execute_batched(rsv, statement).await?,
    };
    debug!(
        ?kind,
        has_first = execution.first.is_some(),
        "statement dispatched"
    );

    Ok(execution)
}

//! The discard sink.

use super::{BoxFuture, DecisionRecord, LedgerSink, SinkError};
use crate::domain::Event;

/// A sink that discards everything.
pub struct NoopSink;

impl LedgerSink for NoopSink {
    fn emit_decision<'a>(
        &'a self,
        _record: &'a DecisionRecord,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async { Ok(()) })
    }

    fn emit_event<'a>(&'a self, _event: &'a Event) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async { Ok(()) })
    }

    fn close<'a>(&'a self) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async { Ok(()) })
    }
}

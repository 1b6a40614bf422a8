//! The batch processor: drives every record of an invocation through decode, extract and
//! upsert.
//!
//! Records are processed sequentially in delivery order on a single warehouse session. Each
//! upsert runs in its own transaction and is committed before the next record starts, so a
//! fatal error rolls back only the record in flight: upserts already committed are kept, the
//! remaining records are not processed and the invocation fails. Upserts are idempotent, so
//! retrying the whole batch is safe.

use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::conversions::decode_image;
use crate::destination::{WarehouseConnector, WarehouseSession};
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::extract::extract;
use crate::registry::MappingRegistry;
use crate::types::{ChangeRecord, InvocationPayload, ValueTree};
use crate::upsert::{UpsertEngine, UpsertOutcome};

/// Minimum number of populated columns for a row to be written.
const MIN_POPULATED_COLUMNS: usize = 2;

/// What happened to one record of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Upserted(UpsertOutcome),
    /// The event kind carries nothing to upsert.
    Ignored,
    /// A recoverable error skipped the record.
    Skipped(EtlError),
}

/// Per-record outcomes of a processed batch, in delivery order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    outcomes: Vec<RecordOutcome>,
}

impl BatchReport {
    pub fn outcomes(&self) -> &[RecordOutcome] {
        &self.outcomes
    }

    pub fn upserted(&self) -> usize {
        self.count(|outcome| matches!(outcome, RecordOutcome::Upserted(_)))
    }

    pub fn ignored(&self) -> usize {
        self.count(|outcome| matches!(outcome, RecordOutcome::Ignored))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, RecordOutcome::Skipped(_)))
    }

    fn count(&self, predicate: impl Fn(&RecordOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|outcome| predicate(outcome)).count()
    }
}

/// Replicates invocation payloads into the warehouse.
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    registry: MappingRegistry,
    engine: UpsertEngine,
    deadline: Option<Duration>,
}

impl BatchProcessor {
    pub fn new(registry: MappingRegistry, engine: UpsertEngine) -> Self {
        Self {
            registry,
            engine,
            deadline: None,
        }
    }

    /// Bounds the time a batch may take, from connecting to the last record.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Processes a raw invocation payload and returns it unchanged.
    pub async fn handle<C>(
        &self,
        input: serde_json::Value,
        connector: &C,
    ) -> EtlResult<serde_json::Value>
    where
        C: WarehouseConnector,
    {
        let payload: InvocationPayload =
            serde_json::from_value(input.clone()).map_err(|err| {
                etl_error!(
                    ErrorKind::InvalidPayload,
                    "Invocation payload is malformed",
                    err,
                    source: err
                )
            })?;

        self.run(&payload, connector).await?;

        Ok(input)
    }

    /// Processes a payload on a session opened from `connector`.
    ///
    /// No session is opened when no record carries an upsertable event. The deadline covers
    /// opening the session as well as processing. An opened session is released however
    /// processing ends, including on deadline expiry.
    pub async fn run<C>(&self, payload: &InvocationPayload, connector: &C) -> EtlResult<BatchReport>
    where
        C: WarehouseConnector,
    {
        let records = payload.records();
        if !records.iter().any(|record| record.event_name.is_upsert()) {
            debug!(records = records.len(), "no upsertable records in batch");
            return Ok(BatchReport {
                outcomes: vec![RecordOutcome::Ignored; records.len()],
            });
        }

        let mut session: Option<C::Session> = None;
        let work = async {
            let session = session.insert(connector.connect().await?);
            self.process(payload, session).await
        };

        let result = match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, work).await {
                Ok(result) => result,
                Err(_) => Err(etl_error!(
                    ErrorKind::TimedOut,
                    "Batch did not finish before its deadline",
                    format!("{deadline:?}")
                )),
            },
            None => work.await,
        };

        let Some(session) = session else {
            return result;
        };

        let released = session.release().await;
        if let Err(err) = &released {
            warn!(error = %err, "failed to release warehouse session");
        }

        let report = result?;
        released?;

        Ok(report)
    }

    /// Processes every record of `payload` on `session`, stopping at the first fatal error.
    pub async fn process<S>(
        &self,
        payload: &InvocationPayload,
        session: &mut S,
    ) -> EtlResult<BatchReport>
    where
        S: WarehouseSession,
    {
        let records = payload.records();
        info!(records = records.len(), "processing batch");

        let mut outcomes = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let span = info_span!(
                "record",
                index,
                event_name = %record.event_name,
                sequence_number = record.sequence_number()
            );
            match self.process_record(session, record).instrument(span).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    error!(
                        index,
                        processed = outcomes.len(),
                        error = %err,
                        "aborting batch on fatal error"
                    );
                    return Err(err);
                }
            }
        }

        let report = BatchReport { outcomes };
        info!(
            upserted = report.upserted(),
            skipped = report.skipped(),
            ignored = report.ignored(),
            "processed batch"
        );

        Ok(report)
    }

    async fn process_record<S>(
        &self,
        session: &mut S,
        record: &ChangeRecord,
    ) -> EtlResult<RecordOutcome>
    where
        S: WarehouseSession,
    {
        if !record.event_name.is_upsert() {
            debug!("ignoring record");
            return Ok(RecordOutcome::Ignored);
        }

        let source_table = record.source_table()?;
        let Some(mapping) = self.registry.get(source_table) else {
            error!(source_table, "no mapping configured for source table, skipping record");
            return Ok(RecordOutcome::Skipped(etl_error!(
                ErrorKind::MissingTableMapping,
                "No mapping configured for source table",
                source_table
            )));
        };

        let tree = match record.new_image() {
            Some(image) => decode_image(image)?,
            None => ValueTree::default(),
        };
        let row = extract(&tree, mapping.columns());

        if row.len() < MIN_POPULATED_COLUMNS {
            warn!(
                source_table,
                table = mapping.table(),
                columns = row.len(),
                "row has nothing beyond its key to write, skipping record"
            );
            return Ok(RecordOutcome::Skipped(etl_error!(
                ErrorKind::EmptyRow,
                "Row has fewer than two populated columns",
                source_table
            )));
        }

        if !row.contains(mapping.primary_key()) {
            warn!(
                source_table,
                table = mapping.table(),
                primary_key = mapping.primary_key(),
                "row has no primary key value, skipping record"
            );
            return Ok(RecordOutcome::Skipped(etl_error!(
                ErrorKind::MissingPrimaryKeyValue,
                "Row has no value for the primary key column",
                mapping.primary_key()
            )));
        }

        session.begin().await?;
        match self
            .engine
            .upsert(session, mapping.table(), mapping.primary_key(), &row)
            .await
        {
            Ok(outcome) => {
                session.commit().await?;
                Ok(RecordOutcome::Upserted(outcome))
            }
            Err(err) => {
                if let Err(rollback_err) = session.rollback().await {
                    warn!(error = %rollback_err, "failed to roll back record transaction");
                }
                Err(err)
            }
        }
    }
}

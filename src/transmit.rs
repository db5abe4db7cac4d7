//! Transmission of payloads and row streams.
//!
//! [`Transmitter`] ties the pipeline together. For every payload it splits the
//! bytes into segments, gives each segment a message id, encodes the segment
//! into keys and broadcasts the selected keys through the radio sequencer,
//! pausing between keys. [`Transmitter::run`] does the same for every row of a
//! [`RowSource`] that is newer than the stored checkpoint and saves the
//! checkpoint when it is done.
//!
//! Failures are scoped. An exhausted key search abandons the rest of its
//! segment, a radio failure skips one key, and a row that cannot be encoded is
//! skipped. All of them are collected in the [`RunReport`] instead of ending
//! the run. Only an unreadable source, a checkpoint error or cancellation stop
//! it early.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::advert::Advertisement;
use crate::checkpoint::CheckpointStore;
use crate::curve::{P224Validator, PointValidator};
use crate::encoder::{ChunkEncoder, EncodedChunk, MAX_SEGMENT_SIZE, split_segments};
use crate::radio::{RadioDriver, RadioSequencer};
use crate::source::RowSource;
use crate::{Result, TagalongError};

/// How message ids are assigned to segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageIdPolicy {
    /// Every segment takes the next id; ids keep increasing across payloads.
    #[default]
    PerSegment,
    /// Every payload reuses the first id. Payloads must fit one segment.
    Fixed,
}

/// Which keys of a segment go on air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySelection {
    /// One broadcast per chunk.
    #[default]
    All,
    /// Only the final key, which carries the whole segment.
    Last,
}

/// Knobs for one transmitter.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmitSettings {
    pub segment_size: usize,
    pub first_message_id: u32,
    pub message_ids: MessageIdPolicy,
    pub key_selection: KeySelection,
    /// Broadcast sequences per key.
    pub repeat_count: u32,
    /// Passes over a segment's keys.
    pub rounds: u32,
    pub key_delay: Duration,
    /// Resend rows whose timestamp equals the checkpoint.
    pub resume_inclusive: bool,
}

impl Default for TransmitSettings {
    fn default() -> Self {
        Self {
            segment_size: MAX_SEGMENT_SIZE,
            first_message_id: 0,
            message_ids: MessageIdPolicy::PerSegment,
            key_selection: KeySelection::All,
            repeat_count: 3,
            rounds: 1,
            key_delay: Duration::from_millis(100),
            resume_inclusive: false,
        }
    }
}

/// One segment of a payload and the message id it travels under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPlan<'a> {
    pub index: usize,
    pub message_id: u32,
    pub bytes: &'a [u8],
}

/// Split `payload` and assign message ids starting at `next_message_id`.
///
/// # Errors
///
/// [`TagalongError::Payload`] for an empty payload, a multi-segment payload
/// under [`MessageIdPolicy::Fixed`], or when the id after the last segment
/// would overflow.
pub fn plan_segments<'a>(
    payload: &'a [u8],
    settings: &TransmitSettings,
    next_message_id: u32,
) -> Result<Vec<SegmentPlan<'a>>> {
    if payload.is_empty() {
        return Err(TagalongError::payload("payload is empty"));
    }

    let segments: Vec<&[u8]> = split_segments(payload, settings.segment_size)?.collect();
    match settings.message_ids {
        MessageIdPolicy::Fixed if segments.len() > 1 => Err(TagalongError::payload(format!(
            "{} bytes need {} segments but the message id is fixed",
            payload.len(),
            segments.len()
        ))),
        MessageIdPolicy::Fixed => Ok(vec![SegmentPlan {
            index: 0,
            message_id: settings.first_message_id,
            bytes: segments[0],
        }]),
        MessageIdPolicy::PerSegment => {
            let fits = u32::try_from(segments.len())
                .ok()
                .and_then(|count| next_message_id.checked_add(count))
                .is_some();
            if !fits {
                return Err(TagalongError::payload(format!(
                    "{} segments starting at message id {} overflow u32",
                    segments.len(),
                    next_message_id
                )));
            }
            Ok(segments
                .into_iter()
                .enumerate()
                .map(|(index, bytes)| SegmentPlan {
                    index,
                    message_id: next_message_id + index as u32,
                    bytes,
                })
                .collect())
        }
    }
}

/// A unit of work that did not go through.
#[derive(Debug)]
pub struct Failure {
    /// 1-based row number within the run, when the failure belongs to a row.
    pub row: Option<usize>,
    pub timestamp: Option<f64>,
    pub segment: Option<usize>,
    pub message_id: Option<u32>,
    pub error: TagalongError,
}

impl Failure {
    fn new(error: TagalongError) -> Self {
        Self { row: None, timestamp: None, segment: None, message_id: None, error }
    }

    fn in_segment(mut self, plan: &SegmentPlan<'_>) -> Self {
        self.segment = Some(plan.index);
        self.message_id = Some(plan.message_id);
        self
    }

    fn in_row(mut self, row: usize, timestamp: Option<f64>) -> Self {
        self.row = Some(row);
        self.timestamp = timestamp;
        self
    }
}

/// Outcome of one payload.
#[derive(Debug, Default)]
pub struct PayloadReport {
    pub message_ids: Vec<u32>,
    pub segments_sent: usize,
    pub segments_failed: usize,
    pub keys_broadcast: usize,
    pub radio_failures: usize,
    pub failures: Vec<Failure>,
}

impl PayloadReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of a whole run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub rows_seen: usize,
    pub rows_skipped: usize,
    pub rows_sent: usize,
    pub rows_failed: usize,
    pub segments_sent: usize,
    pub segments_failed: usize,
    pub keys_broadcast: usize,
    pub radio_failures: usize,
    pub failures: Vec<Failure>,
    /// Largest timestamp consumed by this run.
    pub last_timestamp: Option<f64>,
    pub next_message_id: u32,
    pub cancelled: bool,
}

impl RunReport {
    fn absorb(&mut self, payload: PayloadReport, row: usize, timestamp: f64) {
        if payload.is_complete() {
            self.rows_sent += 1;
        } else {
            self.rows_failed += 1;
        }
        self.tally(payload, row, timestamp);
    }

    /// Add what a payload put on air without counting its row as finished.
    fn tally(&mut self, payload: PayloadReport, row: usize, timestamp: f64) {
        self.segments_sent += payload.segments_sent;
        self.segments_failed += payload.segments_failed;
        self.keys_broadcast += payload.keys_broadcast;
        self.radio_failures += payload.radio_failures;
        self.failures
            .extend(payload.failures.into_iter().map(|f| f.in_row(row, Some(timestamp))));
    }

    fn consumed(&mut self, timestamp: f64) {
        self.last_timestamp = Some(self.last_timestamp.map_or(timestamp, |t| t.max(timestamp)));
    }
}

/// Puts single keys on air for a [`Transmitter`].
///
/// The key delay runs before every key except the first, so a cancellation
/// during the delay never lands after a row's final key.
#[derive(Debug)]
struct KeyBroadcaster<D> {
    sequencer: RadioSequencer<D>,
    repeat_count: u32,
    key_delay: Duration,
    cancel: CancellationToken,
    delay_pending: bool,
}

impl<D: RadioDriver> KeyBroadcaster<D> {
    async fn send_key(
        &mut self,
        chunk: &EncodedChunk,
        plan: &SegmentPlan<'_>,
        report: &mut PayloadReport,
    ) -> Result<()> {
        if self.delay_pending {
            self.pause().await?;
        }
        if self.cancel.is_cancelled() {
            return Err(TagalongError::Cancelled);
        }

        let advert = Advertisement::assemble(&chunk.key);
        debug!(
            "Key {} of message {}: address={} key={}",
            chunk.index, plan.message_id, advert.address, chunk.key
        );

        match self.sequencer.broadcast_repeated(&advert, self.repeat_count).await {
            Ok(()) => report.keys_broadcast += 1,
            Err(e) => {
                error!("Broadcast of key {} failed: {}", chunk.key, e);
                report.radio_failures += 1;
                report.failures.push(Failure::new(e).in_segment(plan));
            }
        }

        self.delay_pending = true;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        if self.key_delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TagalongError::Cancelled),
            _ = tokio::time::sleep(self.key_delay) => Ok(()),
        }
    }
}

/// Drives encoding and broadcasting for a single radio.
#[derive(Debug)]
pub struct Transmitter<D, V = P224Validator> {
    encoder: ChunkEncoder<V>,
    broadcaster: KeyBroadcaster<D>,
    settings: TransmitSettings,
    next_message_id: u32,
}

impl<D: RadioDriver, V: PointValidator> Transmitter<D, V> {
    pub fn new(
        encoder: ChunkEncoder<V>,
        sequencer: RadioSequencer<D>,
        settings: TransmitSettings,
    ) -> Self {
        let broadcaster = KeyBroadcaster {
            sequencer,
            repeat_count: settings.repeat_count,
            key_delay: settings.key_delay,
            cancel: CancellationToken::new(),
            delay_pending: false,
        };
        let next_message_id = settings.first_message_id;
        Self { encoder, broadcaster, settings, next_message_id }
    }

    /// Stop between keys once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.broadcaster.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.broadcaster.cancel.clone()
    }

    pub fn settings(&self) -> &TransmitSettings {
        &self.settings
    }

    pub fn encoder(&self) -> &ChunkEncoder<V> {
        &self.encoder
    }

    pub fn sequencer(&self) -> &RadioSequencer<D> {
        &self.broadcaster.sequencer
    }

    /// Message id the next segment will use.
    pub fn next_message_id(&self) -> u32 {
        self.next_message_id
    }

    /// Encode and broadcast one payload.
    ///
    /// Search and radio failures are recorded in the returned report.
    ///
    /// # Errors
    ///
    /// [`TagalongError::Payload`] when the payload cannot be segmented, and
    /// [`TagalongError::Cancelled`] when the token fires between keys.
    pub async fn send_payload(&mut self, payload: &[u8]) -> Result<PayloadReport> {
        let mut report = PayloadReport::default();
        self.send_payload_into(payload, &mut report).await?;
        Ok(report)
    }

    /// Like [`Transmitter::send_payload`], but keys sent before an error stay
    /// counted in `report`.
    async fn send_payload_into(
        &mut self,
        payload: &[u8],
        report: &mut PayloadReport,
    ) -> Result<()> {
        let plans = plan_segments(payload, &self.settings, self.next_message_id)?;
        if self.settings.message_ids == MessageIdPolicy::PerSegment {
            // plan_segments checked this cannot overflow
            self.next_message_id += plans.len() as u32;
        }

        for plan in &plans {
            info!(
                "Segment {}/{}: message id {}, {} bytes, {} keys",
                plan.index + 1,
                plans.len(),
                plan.message_id,
                plan.bytes.len(),
                self.encoder.chunk_count(plan.bytes.len())
            );
            report.message_ids.push(plan.message_id);
            self.send_segment(plan, report).await?;
        }

        Ok(())
    }

    async fn send_segment(
        &mut self,
        plan: &SegmentPlan<'_>,
        report: &mut PayloadReport,
    ) -> Result<()> {
        let broadcast_each = self.settings.key_selection == KeySelection::All;
        let mut keys: Vec<EncodedChunk> = Vec::new();
        let mut search_failed = false;

        // First round broadcasts while encoding so key N+1 is only searched
        // after key N went out.
        for result in self.encoder.segment(plan.bytes, plan.message_id) {
            let chunk = match result {
                Ok(chunk) => chunk,
                Err(e) => {
                    let e = e.at_segment(plan.index);
                    warn!("Abandoning segment {}: {}", plan.index, e);
                    report.failures.push(Failure::new(e).in_segment(plan));
                    search_failed = true;
                    break;
                }
            };
            if broadcast_each {
                self.broadcaster.send_key(&chunk, plan, report).await?;
            }
            keys.push(chunk);
        }

        if search_failed {
            report.segments_failed += 1;
            return Ok(());
        }

        let selected: Vec<EncodedChunk> = match self.settings.key_selection {
            KeySelection::All => keys,
            KeySelection::Last => keys.last().copied().into_iter().collect(),
        };
        let first_extra_round = if broadcast_each { 1 } else { 0 };
        for round in first_extra_round..self.settings.rounds {
            debug!("Segment {} round {}/{}", plan.index, round + 1, self.settings.rounds);
            for chunk in &selected {
                self.broadcaster.send_key(chunk, plan, report).await?;
            }
        }

        report.segments_sent += 1;
        Ok(())
    }

    /// Transmit every new row of `source`, then save the checkpoint.
    ///
    /// Rows at or before the stored checkpoint are skipped; with
    /// `resume_inclusive` a row exactly at the checkpoint is sent again.
    /// After a cancellation the checkpoint covers only finished rows. Rows
    /// without a finite timestamp are recorded as malformed and never move
    /// the checkpoint.
    ///
    /// # Errors
    ///
    /// Fails when the checkpoint cannot be loaded or saved, or the source
    /// reports an error that is not scoped to a single row.
    pub async fn run<S, C>(&mut self, source: &mut S, checkpoint: &mut C) -> Result<RunReport>
    where
        S: RowSource + ?Sized,
        C: CheckpointStore + ?Sized,
    {
        let resume_from = checkpoint.load()?;
        match resume_from {
            Some(ts) => info!("Resuming after checkpoint {}", ts),
            None => info!("No checkpoint, sending every row"),
        }

        let mut report = RunReport::default();
        loop {
            if self.broadcaster.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let row = match source.next_row().await {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) if e.is_per_unit() => {
                    report.rows_seen += 1;
                    report.rows_failed += 1;
                    warn!("Skipping row {}: {}", report.rows_seen, e);
                    report.failures.push(Failure::new(e).in_row(report.rows_seen, None));
                    continue;
                }
                Err(e) => {
                    error!("Row source failed after {} rows: {}", report.rows_seen, e);
                    return Err(e);
                }
            };
            report.rows_seen += 1;
            let row_number = report.rows_seen;

            if !row.timestamp.is_finite() {
                let e = TagalongError::MalformedRow {
                    row: row_number,
                    details: format!("timestamp {} is not finite", row.timestamp),
                };
                warn!("Skipping row {}: {}", row_number, e);
                report.rows_failed += 1;
                report.failures.push(Failure::new(e).in_row(row_number, None));
                continue;
            }

            if let Some(resume) = resume_from {
                let already_sent = if self.settings.resume_inclusive {
                    row.timestamp < resume
                } else {
                    row.timestamp <= resume
                };
                if already_sent {
                    debug!("Row {} at {} is covered by the checkpoint", row_number, row.timestamp);
                    report.rows_skipped += 1;
                    continue;
                }
            }

            info!("Row {} at {}: {} bytes", row_number, row.timestamp, row.payload.len());
            let mut payload = PayloadReport::default();
            match self.send_payload_into(&row.payload, &mut payload).await {
                Ok(()) => report.absorb(payload, row_number, row.timestamp),
                Err(TagalongError::Cancelled) => {
                    info!(
                        "Cancelled during row {} after {} keys",
                        row_number, payload.keys_broadcast
                    );
                    report.tally(payload, row_number, row.timestamp);
                    report.cancelled = true;
                    break;
                }
                Err(e) if e.is_per_unit() => {
                    warn!("Row {} not sent: {}", row_number, e);
                    report.rows_failed += 1;
                    report.tally(payload, row_number, row.timestamp);
                    report.failures.push(Failure::new(e).in_row(row_number, Some(row.timestamp)));
                }
                Err(e) => {
                    error!("Row {} stopped the run: {}", row_number, e);
                    return Err(e);
                }
            }
            report.consumed(row.timestamp);
        }

        report.next_message_id = self.next_message_id;
        if let Some(last) = report.last_timestamp {
            let newest = resume_from.map_or(last, |previous| previous.max(last));
            checkpoint.save(newest)?;
        }

        info!(
            "Run finished: {} rows seen, {} skipped, {} sent, {} failed, {} keys broadcast{}",
            report.rows_seen,
            report.rows_skipped,
            report.rows_sent,
            report.rows_failed,
            report.keys_broadcast,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }
}

//! Textual projection of anchors, envelopes and threads.
//!
//! The projection is a line-oriented format meant for external editing and
//! re-import:
//!
//! ```text
//! (anchor :doc.txt {x 10 y 20})
//! (envelope :env-1 :legal {x 0 y 0 w 400 h 300})
//! (thread :doc.txt :notes.md)
//! ```
//!
//! Identifiers match `[A-Za-z0-9_.@-]+` (the `@` admits fossil ids), numeric
//! fields are non-negative integers, whitespace between tokens is flexible,
//! and lines starting with `;` are comments.
//!
//! ## Unmatched lines
//!
//! Import never aborts on a line it cannot parse: the line is skipped,
//! counted in [`ShatterReport::skipped`] and logged at warn level. Callers
//! that want fail-fast behavior can reject a report with a nonzero skip
//! count.

use std::fmt::Write as _;
use std::sync::Arc;

use regex_lite::Regex;

use crate::bus::EventBus;
use crate::store::RecordStore;
use crate::types::{Anchor, AtomEvent, Envelope, Thread};

const IDENT: &str = "[A-Za-z0-9_.@-]+";

/// Error type for projection operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectorError {
    /// Backing store failure.
    #[error("Store error: {0}")]
    Store(String),
}

impl ProjectorError {
    fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::Store(e.to_string())
    }
}

/// Counts from one import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShatterReport {
    /// Anchor lines applied.
    pub anchors: usize,
    /// Envelope lines applied.
    pub envelopes: usize,
    /// Thread lines applied (duplicate edges included; inserts are
    /// idempotent).
    pub threads: usize,
    /// Non-blank, non-comment lines that matched no pattern.
    pub skipped: usize,
}

/// Serializes and deserializes geometry relations.
pub struct GeometryProjector<S> {
    store: Arc<S>,
    bus: Arc<EventBus>,
    anchor_pattern: Regex,
    envelope_pattern: Regex,
    thread_pattern: Regex,
}

impl<S: RecordStore> GeometryProjector<S> {
    /// Create a projector over the given store and bus.
    pub fn new(store: Arc<S>, bus: Arc<EventBus>) -> Self {
        let anchor_pattern = Regex::new(&format!(
            r"^\(anchor\s+:({IDENT})\s+\{{x\s+(\d+)\s+y\s+(\d+)\}}\)$"
        ))
        .expect("anchor pattern is valid");
        let envelope_pattern = Regex::new(&format!(
            r"^\(envelope\s+:({IDENT})\s+:({IDENT})\s+\{{x\s+(\d+)\s+y\s+(\d+)\s+w\s+(\d+)\s+h\s+(\d+)\}}\)$"
        ))
        .expect("envelope pattern is valid");
        let thread_pattern = Regex::new(&format!(
            r"^\(thread\s+:({IDENT})\s+:({IDENT})\)$"
        ))
        .expect("thread pattern is valid");

        Self {
            store,
            bus,
            anchor_pattern,
            envelope_pattern,
            thread_pattern,
        }
    }

    /// Serialize all anchors, envelopes and threads, one record per line.
    ///
    /// Groups are written in a stable order: anchors, then envelopes, then
    /// threads. Within a group, order follows store iteration order.
    pub async fn project(&self) -> Result<String, ProjectorError> {
        let anchors = self
            .store
            .list_anchors()
            .await
            .map_err(ProjectorError::from_store)?;
        let envelopes = self
            .store
            .list_envelopes()
            .await
            .map_err(ProjectorError::from_store)?;
        let threads = self
            .store
            .list_threads()
            .await
            .map_err(ProjectorError::from_store)?;

        let mut out = String::new();
        for anchor in &anchors {
            let _ = writeln!(out, "(anchor :{} {{x {} y {}}})", anchor.atom_id, anchor.x, anchor.y);
        }
        for envelope in &envelopes {
            let _ = writeln!(
                out,
                "(envelope :{} :{} {{x {} y {} w {} h {}}})",
                envelope.id, envelope.domain, envelope.x, envelope.y, envelope.w, envelope.h
            );
        }
        for thread in &threads {
            let _ = writeln!(out, "(thread :{} :{})", thread.source, thread.target);
        }

        tracing::info!(
            anchors = anchors.len(),
            envelopes = envelopes.len(),
            threads = threads.len(),
            "Projected geometry"
        );
        Ok(out)
    }

    /// Read a projection back into the store, line by line.
    ///
    /// Anchors and envelopes upsert by id, threads insert-if-absent. A new
    /// thread edge publishes a [`AtomEvent::ThreadLinked`] event; duplicate
    /// edges are silent no-ops.
    pub async fn shatter(&self, text: &str) -> Result<ShatterReport, ProjectorError> {
        let mut report = ShatterReport::default();

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }

            if let Some(captures) = self.anchor_pattern.captures(line) {
                if let (Ok(x), Ok(y)) = (captures[2].parse::<i64>(), captures[3].parse::<i64>()) {
                    self.store
                        .upsert_anchor(Anchor::new(&captures[1], x, y))
                        .await
                        .map_err(ProjectorError::from_store)?;
                    report.anchors += 1;
                    continue;
                }
            }

            if let Some(captures) = self.envelope_pattern.captures(line) {
                let fields: Result<Vec<i64>, _> =
                    (3..=6).map(|i| captures[i].parse::<i64>()).collect();
                if let Ok(fields) = fields {
                    self.store
                        .upsert_envelope(Envelope::new(
                            &captures[1],
                            &captures[2],
                            fields[0],
                            fields[1],
                            fields[2],
                            fields[3],
                        ))
                        .await
                        .map_err(ProjectorError::from_store)?;
                    report.envelopes += 1;
                    continue;
                }
            }

            if let Some(captures) = self.thread_pattern.captures(line) {
                let thread = Thread::new(&captures[1], &captures[2]);
                let inserted = self
                    .store
                    .insert_thread(thread.clone())
                    .await
                    .map_err(ProjectorError::from_store)?;
                if inserted {
                    self.bus.publish(AtomEvent::ThreadLinked {
                        source: thread.source,
                        target: thread.target,
                    });
                }
                report.threads += 1;
                continue;
            }

            tracing::warn!(line, "Skipping unrecognized projection line");
            report.skipped += 1;
        }

        tracing::info!(
            anchors = report.anchors,
            envelopes = report.envelopes,
            threads = report.threads,
            skipped = report.skipped,
            "Shattered geometry"
        );
        Ok(report)
    }
}

//! Splitting a reporter's tablet set into one reporting sequence.

use std::collections::VecDeque;

use chrono::Utc;

use super::task::{TabletReportBatch, TabletReportInfo};
use crate::error::{RpcError, RpcResult};
use crate::types::Address;

/// Ordered batches of one reporting sequence.
///
/// Every batch carries the same `timestamp`; only the last one has
/// `has_more = false`. An empty tablet set still yields one (empty,
/// terminal) batch so the root can commit "this reporter holds nothing".
#[derive(Debug, Clone)]
pub struct ReportSequence {
    reporter: Address,
    timestamp: i64,
    batches: VecDeque<Vec<TabletReportInfo>>,
}

impl ReportSequence {
    pub fn new(
        reporter: Address,
        tablets: Vec<TabletReportInfo>,
        timestamp: i64,
        batch_size: usize,
    ) -> RpcResult<Self> {
        if batch_size == 0 {
            return Err(RpcError::InvalidArgument(
                "report batch size must be positive".into(),
            ));
        }

        let mut batches: VecDeque<Vec<TabletReportInfo>> = VecDeque::new();
        let mut tablets = tablets.into_iter().peekable();
        while tablets.peek().is_some() {
            batches.push_back(tablets.by_ref().take(batch_size).collect());
        }
        if batches.is_empty() {
            batches.push_back(Vec::new());
        }

        Ok(Self {
            reporter,
            timestamp,
            batches,
        })
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn reporter(&self) -> &Address {
        &self.reporter
    }

    /// Batches not yet yielded.
    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

impl Iterator for ReportSequence {
    type Item = TabletReportBatch;

    fn next(&mut self) -> Option<Self::Item> {
        let tablets = self.batches.pop_front()?;
        Some(TabletReportBatch {
            reporter: self.reporter.clone(),
            tablets,
            timestamp: self.timestamp,
            has_more: !self.batches.is_empty(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.batches.len(), Some(self.batches.len()))
    }
}

/// A fresh sequence timestamp in microseconds since the epoch.
pub fn report_timestamp() -> i64 {
    Utc::now().timestamp_micros()
}

//! Bookkeeping for one chunked upload.
//!
//! The session never performs I/O. Workers claim chunk indices from it and
//! report acknowledgements back; the cursor only ever hands out chunks
//! that are not yet acknowledged, and `rewind` sends it back to the first
//! gap so a new pass picks up anything an aborted pass left behind.
//! Transient failures are counted here too, so a resumed upload keeps
//! spending the same error budget.

use std::fmt;

#[derive(Clone, PartialEq, Eq)]
pub struct ChunkSession {
    total: usize,
    acknowledged: Vec<bool>,
    acknowledged_count: usize,
    cursor: usize,
    header_posted: bool,
    errors: u32,
}

impl ChunkSession {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            acknowledged: vec![false; total],
            acknowledged_count: 0,
            cursor: 0,
            header_posted: false,
            errors: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn acknowledged_count(&self) -> usize {
        self.acknowledged_count
    }

    /// Offset the next claim starts searching from.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn header_posted(&self) -> bool {
        self.header_posted
    }

    /// Transient failures recorded over the whole upload.
    pub fn errors(&self) -> u32 {
        self.errors
    }

    /// Count one more failure and return the new total.
    pub fn record_error(&mut self) -> u32 {
        self.errors = self.errors.saturating_add(1);
        self.errors
    }

    pub fn is_acknowledged(&self, index: usize) -> bool {
        self.acknowledged.get(index).copied().unwrap_or(false)
    }

    /// Record the header as accepted. With the data inline every chunk is
    /// delivered along with it.
    pub fn mark_header_posted(&mut self, data_inline: bool) {
        self.header_posted = true;
        if data_inline {
            self.acknowledged.iter_mut().for_each(|a| *a = true);
            self.acknowledged_count = self.total;
            self.cursor = self.total;
        }
    }

    /// Next chunk to send, skipping acknowledged ones.
    pub fn claim_next(&mut self) -> Option<usize> {
        while self.cursor < self.total && self.acknowledged[self.cursor] {
            self.cursor += 1;
        }
        if self.cursor < self.total {
            let index = self.cursor;
            self.cursor += 1;
            Some(index)
        } else {
            None
        }
    }

    /// Returns false if the chunk was already acknowledged.
    pub fn acknowledge(&mut self, index: usize) -> bool {
        match self.acknowledged.get_mut(index) {
            Some(slot) if !*slot => {
                *slot = true;
                self.acknowledged_count += 1;
                true
            }
            _ => false,
        }
    }

    /// Move the cursor back to the first unacknowledged chunk.
    pub fn rewind(&mut self) {
        self.cursor = self
            .acknowledged
            .iter()
            .position(|a| !a)
            .unwrap_or(self.total);
    }

    pub fn is_complete(&self) -> bool {
        self.header_posted && self.acknowledged_count == self.total
    }

    /// Truncated percentage. A posted header with no chunks is 100 %.
    pub fn pct_complete(&self) -> u8 {
        if self.total == 0 {
            return if self.header_posted { 100 } else { 0 };
        }
        ((self.acknowledged_count * 100) / self.total) as u8
    }
}

impl fmt::Debug for ChunkSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkSession")
            .field("total", &self.total)
            .field("acknowledged", &self.acknowledged_count)
            .field("cursor", &self.cursor)
            .field("header_posted", &self.header_posted)
            .field("errors", &self.errors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_claims_in_order() {
        let mut session = ChunkSession::new(3);
        session.mark_header_posted(false);
        assert_eq!(session.claim_next(), Some(0));
        assert_eq!(session.claim_next(), Some(1));
        assert_eq!(session.claim_next(), Some(2));
        assert_eq!(session.claim_next(), None);
        assert!(!session.is_complete());
    }

    #[test]
    fn test_inline_header_completes() {
        let mut session = ChunkSession::new(1);
        assert!(!session.is_complete());
        session.mark_header_posted(true);
        assert!(session.is_complete());
        assert_eq!(session.pct_complete(), 100);
        assert_eq!(session.claim_next(), None);
    }

    #[test]
    fn test_percent_truncates() {
        let mut session = ChunkSession::new(3);
        session.mark_header_posted(false);
        session.acknowledge(0);
        assert_eq!(session.pct_complete(), 33);
        session.acknowledge(1);
        assert_eq!(session.pct_complete(), 66);
        assert!(!session.acknowledge(1));
        assert_eq!(session.acknowledged_count(), 2);
    }

    #[test]
    fn test_rewind_finds_gap() {
        let mut session = ChunkSession::new(5);
        session.mark_header_posted(false);
        for _ in 0..4 {
            session.claim_next();
        }
        session.acknowledge(0);
        session.acknowledge(2);
        session.rewind();
        assert_eq!(session.cursor(), 1);
        assert_eq!(session.claim_next(), Some(1));
        assert_eq!(session.claim_next(), Some(3));
        assert_eq!(session.claim_next(), Some(4));
        assert_eq!(session.claim_next(), None);
    }

    #[test]
    fn test_errors_survive_rewind_and_clone() {
        let mut session = ChunkSession::new(2);
        session.mark_header_posted(false);
        assert_eq!(session.record_error(), 1);
        assert_eq!(session.record_error(), 2);
        session.rewind();
        let saved = session.clone();
        assert_eq!(saved.errors(), 2);
    }

    proptest! {
        /// After any pattern of acknowledgements and a rewind, one full
        /// pass claims exactly the unacknowledged chunks, each once.
        #[test]
        fn prop_rewind_claims_exactly_the_gaps(acked in proptest::collection::vec(any::<bool>(), 0..200)) {
            let mut session = ChunkSession::new(acked.len());
            session.mark_header_posted(false);
            for (i, a) in acked.iter().enumerate() {
                if *a {
                    session.acknowledge(i);
                }
            }
            session.rewind();

            let mut claimed = Vec::new();
            while let Some(i) = session.claim_next() {
                claimed.push(i);
            }
            let expected: Vec<usize> = acked
                .iter()
                .enumerate()
                .filter(|(_, a)| !**a)
                .map(|(i, _)| i)
                .collect();
            prop_assert_eq!(claimed, expected);
        }

        #[test]
        fn prop_complete_iff_all_acknowledged(total in 0usize..64, header in any::<bool>()) {
            let mut session = ChunkSession::new(total);
            if header {
                session.mark_header_posted(false);
            }
            for i in 0..total {
                prop_assert!(!session.is_complete() || total == 0);
                session.acknowledge(i);
            }
            prop_assert_eq!(session.is_complete(), header);
        }
    }
}

//! Per-lock staging area. Everything a caller does between `lock` and `unlock` accumulates here
//! instead of touching the data file, and is applied atomically (or discarded) at `unlock`.

use crate::Row;

/// Staged mutation for one held lock. A staged delete wins over any update staged afterwards:
/// once `stage_delete` has been called, later `stage_update` calls are silently ignored for the
/// remainder of this lock's lifetime.
#[derive(Clone, Debug)]
pub struct TransactionContext {
    record: u32,
    pending: Option<Row>,
    deleted: bool,
}

impl TransactionContext {
    pub(crate) fn new(record: u32) -> Self {
        Self { record, pending: None, deleted: false }
    }

    pub fn record_number(&self) -> u32 {
        self.record
    }

    pub fn stage_update(&mut self, row: Row) {
        if !self.deleted {
            self.pending = Some(row);
        }
    }

    pub fn stage_delete(&mut self) {
        self.deleted = true;
        self.pending = None;
    }

    pub fn pending(&self) -> Option<&Row> {
        self.pending.as_ref()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_wins_over_later_update() {
        let mut ctx = TransactionContext::new(7);
        ctx.stage_delete();
        ctx.stage_update(vec!["anything".to_string()]);
        assert!(ctx.is_deleted());
        assert!(ctx.pending().is_none());
    }

    #[test]
    fn update_then_update_keeps_latest() {
        let mut ctx = TransactionContext::new(7);
        ctx.stage_update(vec!["first".to_string()]);
        ctx.stage_update(vec!["second".to_string()]);
        assert_eq!(ctx.pending(), Some(&vec!["second".to_string()]));
    }
}

//! Batch planning
//!
//! Splits an ordered list into fixed-size batches plus a trailing remainder.
//! The remainder is never sent as a short batch: it becomes singleton work
//! items, because batch processors may expect an exact arity.

use tracing::debug;

use crate::domain::Lead;

/// Full batches followed by remainder singletons
#[derive(Debug, Clone, PartialEq)]
pub struct Plan<T> {
    pub full_batches: Vec<Vec<T>>,
    pub remainder: Vec<T>,
}

impl<T> Plan<T> {
    /// Number of work items the plan dispatches
    pub fn item_count(&self) -> usize {
        self.full_batches.len() + self.remainder.len()
    }
}

impl Plan<Lead> {
    /// Flatten into dispatcher work items: batches first, then singletons
    pub fn into_work_items(self) -> Vec<WorkItem> {
        let mut items: Vec<WorkItem> = self.full_batches.into_iter().map(WorkItem::Batch).collect();
        items.extend(self.remainder.into_iter().map(WorkItem::Single));
        items
    }
}

/// A unit of work handed to one worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkItem {
    Batch(Vec<Lead>),
    Single(Lead),
}

impl WorkItem {
    pub fn leads(&self) -> &[Lead] {
        match self {
            Self::Batch(leads) => leads,
            Self::Single(lead) => std::slice::from_ref(lead),
        }
    }

    pub fn into_leads(self) -> Vec<Lead> {
        match self {
            Self::Batch(leads) => leads,
            Self::Single(lead) => vec![lead],
        }
    }

    pub fn len(&self) -> usize {
        self.leads().len()
    }

    pub fn is_empty(&self) -> bool {
        self.leads().is_empty()
    }
}

/// Splits work into batches
#[derive(Debug, Clone, Copy)]
pub struct BatchPlanner {
    batch_size: usize,
}

impl BatchPlanner {
    /// A zero batch size is rejected by config validation; here it means 1
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn plan<T>(&self, items: Vec<T>) -> Plan<T> {
        let total = items.len();
        let full_count = total / self.batch_size;
        debug!(total, batch_size = self.batch_size, full_count, "plan: called");

        let mut full_batches = Vec::with_capacity(full_count);
        let mut iter = items.into_iter();
        for _ in 0..full_count {
            full_batches.push(iter.by_ref().take(self.batch_size).collect());
        }
        let remainder: Vec<T> = iter.collect();

        Plan { full_batches, remainder }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawAttributes;
    use proptest::prelude::*;

    #[test]
    fn test_twelve_leads_batch_five() {
        let leads: Vec<Lead> = (0..12).map(|i| Lead::new(format!("lead-{}", i), RawAttributes::new())).collect();
        let plan = BatchPlanner::new(5).plan(leads);
        assert_eq!(plan.full_batches.len(), 2);
        assert!(plan.full_batches.iter().all(|b| b.len() == 5));
        assert_eq!(plan.remainder.len(), 2);

        let items = plan.into_work_items();
        assert_eq!(items.len(), 4);
        assert!(matches!(items[0], WorkItem::Batch(_)));
        assert!(matches!(items[1], WorkItem::Batch(_)));
        assert!(matches!(items[2], WorkItem::Single(_)));
        assert_eq!(items[3].leads()[0].id(), "lead-11");
    }

    #[test]
    fn test_fewer_than_batch_size_all_singletons() {
        let plan = BatchPlanner::new(5).plan(vec![1, 2, 3]);
        assert!(plan.full_batches.is_empty());
        assert_eq!(plan.remainder, vec![1, 2, 3]);
        assert_eq!(plan.item_count(), 3);
    }

    #[test]
    fn test_zero_batch_size_treated_as_one() {
        let planner = BatchPlanner::new(0);
        assert_eq!(planner.batch_size(), 1);
        let plan = planner.plan(vec!['a', 'b']);
        assert_eq!(plan.full_batches, vec![vec!['a'], vec!['b']]);
        assert!(plan.remainder.is_empty());
    }

    #[test]
    fn test_empty_input() {
        let plan = BatchPlanner::new(5).plan(Vec::<u32>::new());
        assert_eq!(plan.item_count(), 0);
    }

    proptest! {
        #[test]
        fn prop_plan_preserves_order_and_sizes(items in proptest::collection::vec(any::<u32>(), 0..200), batch_size in 1usize..20) {
            let plan = BatchPlanner::new(batch_size).plan(items.clone());

            prop_assert_eq!(plan.full_batches.len(), items.len() / batch_size);
            prop_assert!(plan.full_batches.iter().all(|b| b.len() == batch_size));
            prop_assert_eq!(plan.remainder.len(), items.len() % batch_size);

            let mut rebuilt: Vec<u32> = plan.full_batches.into_iter().flatten().collect();
            rebuilt.extend(plan.remainder);
            prop_assert_eq!(rebuilt, items);
        }
    }
}

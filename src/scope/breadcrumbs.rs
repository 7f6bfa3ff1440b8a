use std::collections::VecDeque;

use crate::protocol::Breadcrumb;

pub const DEFAULT_MAX_BREADCRUMBS: usize = 100;

/// Fixed capacity ring buffer; the oldest breadcrumb goes first.
#[derive(Debug, Clone, PartialEq)]
pub struct BreadcrumbBuffer {
    buffer: VecDeque<Breadcrumb>,
    max: usize,
}

impl Default for BreadcrumbBuffer {
    fn default() -> Self {
        BreadcrumbBuffer::new(DEFAULT_MAX_BREADCRUMBS)
    }
}

impl BreadcrumbBuffer {
    #[must_use]
    pub fn new(max: usize) -> Self {
        BreadcrumbBuffer {
            buffer: VecDeque::with_capacity(max.min(DEFAULT_MAX_BREADCRUMBS)),
            max,
        }
    }

    pub fn record(&mut self, crumb: Breadcrumb) {
        if self.max == 0 {
            return;
        }
        while self.buffer.len() >= self.max {
            self.buffer.pop_front();
        }
        self.buffer.push_back(crumb);
    }

    /// Changes the capacity, dropping the oldest breadcrumbs that no
    /// longer fit.
    pub fn set_capacity(&mut self, max: usize) {
        self.max = max;
        while self.buffer.len() > max {
            self.buffer.pop_front();
        }
    }

    #[must_use]
    pub fn peek(&self) -> Option<&Breadcrumb> {
        self.buffer.back()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Breadcrumb> {
        self.buffer.iter().cloned().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_first() {
        let mut buffer = BreadcrumbBuffer::new(2);
        buffer.record(Breadcrumb::new("one"));
        buffer.record(Breadcrumb::new("two"));
        buffer.record(Breadcrumb::new("three"));
        let messages: Vec<String> = buffer
            .to_vec()
            .into_iter()
            .filter_map(|b| b.message)
            .collect();
        assert_eq!(messages, vec!["two", "three"]);
        assert_eq!(buffer.peek().unwrap().message.as_deref(), Some("three"));
    }

    #[test]
    fn shrinking_drops_oldest() {
        let mut buffer = BreadcrumbBuffer::new(5);
        for message in ["a", "b", "c", "d"] {
            buffer.record(Breadcrumb::new(message));
        }
        buffer.set_capacity(2);
        assert_eq!(buffer.capacity(), 2);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.to_vec()[0].message.as_deref(), Some("c"));
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut buffer = BreadcrumbBuffer::new(0);
        buffer.record(Breadcrumb::new("dropped"));
        assert!(buffer.is_empty());
    }
}

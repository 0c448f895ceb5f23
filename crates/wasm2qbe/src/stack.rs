//! Symbolic operand stack shared by the validator and the IR builder.
//!
//! The validator instantiates it with operand types, the builder with SSA
//! variables. Frame heights and stack polymorphism are the caller's concern:
//! the stack itself only refuses to pop what is not there.

/// A LIFO of symbolic slots.
#[derive(Debug, Clone)]
pub struct SymbolicStack<T> {
    items: Vec<T>,
}

impl<T> Default for SymbolicStack<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Clone> SymbolicStack<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn extend<I: IntoIterator<Item = T>>(&mut self, items: I) {
        self.items.extend(items);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.last()
    }

    /// Pop the top `n` slots, returned bottom-first (stack order).
    pub fn pop_n(&mut self, n: usize) -> Option<Vec<T>> {
        let at = self.items.len().checked_sub(n)?;
        Some(self.items.split_off(at))
    }

    /// The top `n` slots, bottom-first, without popping.
    pub fn peek_n(&self, n: usize) -> Option<&[T]> {
        let at = self.items.len().checked_sub(n)?;
        Some(&self.items[at..])
    }

    /// Drop everything above `height`.
    pub fn truncate(&mut self, height: usize) {
        self.items.truncate(height);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_order() {
        let mut s = SymbolicStack::new();
        s.push(1);
        s.push(2);
        s.push(3);
        assert_eq!(s.peek(), Some(&3));
        assert_eq!(s.pop(), Some(3));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn pop_n_is_bottom_first() {
        let mut s = SymbolicStack::new();
        s.extend([1, 2, 3, 4]);
        assert_eq!(s.peek_n(2), Some(&[3, 4][..]));
        assert_eq!(s.pop_n(3), Some(vec![2, 3, 4]));
        assert_eq!(s.as_slice(), &[1]);
    }

    #[test]
    fn pop_n_underflow_leaves_stack_intact() {
        let mut s = SymbolicStack::new();
        s.extend([1, 2]);
        assert_eq!(s.pop_n(3), None);
        assert_eq!(s.len(), 2);
        assert_eq!(s.pop_n(0), Some(vec![]));
    }

    #[test]
    fn truncate_to_height() {
        let mut s = SymbolicStack::new();
        s.extend(["a", "b", "c"]);
        s.truncate(1);
        assert_eq!(s.as_slice(), &["a"]);
        s.truncate(5);
        assert_eq!(s.len(), 1);
        s.clear();
        assert!(s.is_empty());
        assert_eq!(s.pop(), None);
    }
}

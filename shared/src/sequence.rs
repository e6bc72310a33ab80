//! Replay counter for outgoing secure commands

/// Sequence number source. Starts at a random value and wraps at 2^32.
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    next: u32,
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::random()
    }
}

impl SequenceCounter {
    /// Start from a random value
    pub fn random() -> Self {
        Self::starting_at(rand::random())
    }

    /// Start from a known value
    pub fn starting_at(next: u32) -> Self {
        Self { next }
    }

    /// Sequence number the next message will carry
    pub fn peek(&self) -> u32 {
        self.next
    }

    /// Take the current number and move to the next one
    pub fn advance(&mut self) -> u32 {
        let current = self.next;
        self.next = self.next.wrapping_add(1);
        current
    }
}

/// Whether `b` comes after `a` in wrapping sequence order
pub fn is_after(a: u32, b: u32) -> bool {
    let diff = b.wrapping_sub(a);
    diff != 0 && diff < (1 << 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_wraps() {
        let mut seq = SequenceCounter::starting_at(u32::MAX - 1);
        assert_eq!(seq.advance(), u32::MAX - 1);
        assert_eq!(seq.advance(), u32::MAX);
        assert_eq!(seq.advance(), 0);
        assert_eq!(seq.peek(), 1);
    }

    #[test]
    fn test_is_after() {
        assert!(is_after(1, 2));
        assert!(is_after(u32::MAX, 0));
        assert!(!is_after(2, 2));
        assert!(!is_after(3, 2));
    }
}

use std::collections::VecDeque;

use tokio::time::{Duration, Instant};

/// Paces outbound lines to stay below the server's flood threshold.
pub trait RateLimiter<T>: Send {
    fn add_token(&mut self, token: T, priority: TokenPriority);

    /// Refills permits according to the time elapsed since the last refill.
    fn add_permit(&mut self, now: Instant);

    /// Returns as many queued tokens as are permitted right now.
    fn acquire_tokens(&mut self) -> Vec<T>;

    /// Returns every queued token regardless of permits.
    fn drain_tokens(&mut self) -> Vec<T>;

    fn is_empty(&self) -> bool;
}

/// Token bucket with a fixed burst capacity and one new permit per interval.
pub struct TokenBucket<T> {
    duration: Duration,
    capacity: usize,
    available_permits: usize,
    last: Option<Instant>,
    user_tokens: VecDeque<T>,
    high_priority_tokens: VecDeque<T>,
    low_priority_tokens: VecDeque<T>,
}

impl<T> TokenBucket<T> {
    pub fn new(duration: Duration, capacity: usize) -> Self {
        Self {
            duration,
            capacity,
            available_permits: capacity,
            last: None,
            user_tokens: VecDeque::new(),
            high_priority_tokens: VecDeque::new(),
            low_priority_tokens: VecDeque::new(),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.available_permits
    }

    pub fn queued(&self) -> usize {
        self.user_tokens.len() + self.high_priority_tokens.len() + self.low_priority_tokens.len()
    }
}

impl<T: Send> RateLimiter<T> for TokenBucket<T> {
    fn add_token(&mut self, token: T, priority: TokenPriority) {
        match priority {
            TokenPriority::User => self.user_tokens.push_back(token),
            TokenPriority::High => self.high_priority_tokens.push_back(token),
            TokenPriority::Low => self.low_priority_tokens.push_back(token),
        }
    }

    fn add_permit(&mut self, now: Instant) {
        if self.available_permits < self.capacity {
            if let Some(last) = self.last {
                let elapsed = now.saturating_duration_since(last);

                if elapsed >= self.duration {
                    let permits: usize = (elapsed.as_millis() / self.duration.as_millis().max(1))
                        .try_into()
                        .unwrap_or(usize::MAX);

                    self.available_permits = self
                        .available_permits
                        .saturating_add(permits)
                        .min(self.capacity);
                    self.last = Some(now);
                }
            } else {
                self.last = Some(now);
            }
        } else {
            self.last = None;
        }
    }

    fn acquire_tokens(&mut self) -> Vec<T> {
        let number_of_user_tokens = self.available_permits.min(self.user_tokens.len());

        self.available_permits = self
            .available_permits
            .saturating_sub(number_of_user_tokens);

        let number_of_high_priority_tokens =
            self.available_permits.min(self.high_priority_tokens.len());

        self.available_permits = self
            .available_permits
            .saturating_sub(number_of_high_priority_tokens);

        let number_of_low_priority_tokens =
            self.available_permits.min(self.low_priority_tokens.len());

        self.available_permits = self
            .available_permits
            .saturating_sub(number_of_low_priority_tokens);

        self.user_tokens
            .drain(..number_of_user_tokens)
            .chain(
                self.high_priority_tokens
                    .drain(..number_of_high_priority_tokens),
            )
            .chain(self.low_priority_tokens.drain(..number_of_low_priority_tokens))
            .collect()
    }

    fn drain_tokens(&mut self) -> Vec<T> {
        self.user_tokens
            .drain(..)
            .chain(self.high_priority_tokens.drain(..))
            .chain(self.low_priority_tokens.drain(..))
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.queued() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPriority {
    Low,  // Automated queries for retrieving metadata
    High, // Most automated messages
    User, // Messages that the user triggers directly
}

#[cfg(test)]
mod test {
    use tokio::time::{Duration, Instant};

    use super::{RateLimiter, TokenBucket, TokenPriority};

    #[test]
    fn burst_then_pace() {
        let mut bucket = TokenBucket::new(Duration::from_secs(2), 5);
        let start = Instant::now();

        for i in 0..8 {
            bucket.add_token(i, TokenPriority::User);
        }

        assert_eq!(bucket.acquire_tokens(), vec![0, 1, 2, 3, 4]);
        assert!(bucket.acquire_tokens().is_empty());

        // Starts the refill clock
        bucket.add_permit(start);
        bucket.add_permit(start + Duration::from_secs(1));
        assert!(bucket.acquire_tokens().is_empty());

        bucket.add_permit(start + Duration::from_secs(2));
        assert_eq!(bucket.acquire_tokens(), vec![5]);

        bucket.add_permit(start + Duration::from_secs(6));
        assert_eq!(bucket.acquire_tokens(), vec![6, 7]);
        assert!(bucket.is_empty());
    }

    #[test]
    fn priorities() {
        let mut bucket = TokenBucket::new(Duration::from_secs(2), 2);

        bucket.add_token("low", TokenPriority::Low);
        bucket.add_token("high", TokenPriority::High);
        bucket.add_token("user", TokenPriority::User);

        assert_eq!(bucket.acquire_tokens(), vec!["user", "high"]);
        assert_eq!(bucket.drain_tokens(), vec!["low"]);
    }
}

use std::{collections::HashMap, default::Default, num::NonZeroUsize, task::Waker};

#[derive(Debug, Eq, PartialEq, Hash)]
pub(crate) struct Token(NonZeroUsize);

impl Token {
    fn duplicate(&self) -> Token {
        Token(self.0)
    }
}

/// Data structure for managing the wakers of every task that is awaiting a
/// single shared [`LoadFuture`][crate::LoadFuture] result.
///
/// Unlike a plain `Vec<Waker>`, each handle polling the result keeps the
/// token associated with its waker, so that:
/// - repeated polls from the same handle replace its waker rather than
///   piling up stale copies
/// - a dropped handle removes its waker, so a long-lived pending result
///   doesn't keep waking tasks that have lost interest.
///
/// Tokens cannot be cloned or otherwise duplicated outside this module; this
/// helps to ensure that their lifespan is tied to a particular handle.
///
/// The set itself is not synchronized; it lives behind the result cell's
/// mutex, and is drained exactly once, when the result is written.
#[derive(Debug)]
pub(crate) struct WakerSet {
    wakers: HashMap<Token, Waker>,

    // Tokens are an ever-increasing integer. A set only lives until its
    // result is written, so there's no real chance of running out.
    next_token: NonZeroUsize,
}

impl Default for WakerSet {
    fn default() -> Self {
        Self {
            wakers: HashMap::new(),
            next_token: NonZeroUsize::MIN,
        }
    }
}

impl WakerSet {
    /// Add a new waker to this set. Return the token associated with this
    /// waker's entry in the set. The handle should hold on to this token and
    /// pass it to `register` on subsequent polls.
    #[must_use]
    fn add_waker(&mut self, waker: Waker) -> Token {
        let token = Token(self.next_token);
        self.next_token = self.next_token.saturating_add(1);

        self.wakers.insert(token.duplicate(), waker);
        token
    }

    /// Register the waker for a poll. If the handle already has a token, its
    /// waker is updated in place (skipping the clone when it would wake the
    /// same task); otherwise a new entry is created.
    #[must_use]
    pub(crate) fn register(&mut self, token: Option<Token>, waker: &Waker) -> Token {
        match token {
            Some(token) => match self.wakers.get_mut(&token) {
                Some(existing) => {
                    if !existing.will_wake(waker) {
                        existing.clone_from(waker);
                    }
                    token
                }
                None => self.add_waker(waker.clone()),
            },
            None => self.add_waker(waker.clone()),
        }
    }

    /// Discard a waker from this set. No-op if the token isn't present.
    pub(crate) fn discard_waker(&mut self, token: Token) {
        self.wakers.remove(&token);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.wakers.len()
    }

    pub(crate) fn wake_all(self) {
        self.wakers
            .into_iter()
            .for_each(|(_token, waker)| waker.wake());
    }
}

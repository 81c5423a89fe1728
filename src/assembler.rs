//! incremental response reconstruction.
//!
//! fragments arrive one at a time from a completion stream. the assembler
//! keeps the full response for the current turn and returns a snapshot of
//! it after every non-empty fragment, so a ui can *replace* its text.
//!
//! some upstream streams occasionally echo a fragment twice in a row. when an
//! incoming fragment repeats the previously applied one, the response always
//! ends with that fragment, so the tail is dropped before the fragment is
//! appended and the echo does not grow the response. this is best-effort:
//! repeats that are not directly consecutive are left alone.

/// per-turn assembled response plus the last applied fragment.
#[derive(Clone, Debug, Default)]
pub struct StreamAssembler {
    response: String,
    previous: String,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// applies one fragment and returns the updated response.
    ///
    /// empty fragments are ignored and return `None` (nothing to emit).
    pub fn process(&mut self, fragment: &str) -> Option<&str> {
        if fragment.is_empty() {
            return None;
        }

        // `previous` is empty on the first fragment, so nothing is stripped.
        if self.is_echo(fragment) {
            let keep = self.response.len() - self.previous.len();
            self.response.truncate(keep);
        }

        self.response.push_str(fragment);
        self.previous.clear();
        self.previous.push_str(fragment);

        Some(&self.response)
    }

    // `response` always ends with `previous` after an append.
    fn is_echo(&self, fragment: &str) -> bool {
        !self.previous.is_empty() && self.previous == fragment
    }

    /// the response assembled so far.
    pub fn text(&self) -> &str {
        &self.response
    }

    pub fn is_empty(&self) -> bool {
        self.response.is_empty()
    }

    /// start a new turn.
    pub fn reset(&mut self) {
        self.response.clear();
        self.previous.clear();
    }

    pub fn into_text(self) -> String {
        self.response
    }
}

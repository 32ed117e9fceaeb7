//! Sentence boundary detection over streamed reply text.
//!
//! Fragments arrive at arbitrary split points. A sentence is complete once a
//! terminal mark (`.`, `!`, `?`, `।`) is followed by whitespace; anything else
//! after the mark ("3.5", "e.g.") keeps accumulating.

const TERMINALS: [char; 4] = ['.', '!', '?', '।'];

/// Closing characters allowed between a terminal mark and the whitespace.
const TRAILING_CLOSERS: [char; 4] = ['"', '\'', ')', ']'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundaryState {
    Accumulating,
    /// Saw a terminal mark; waiting for whitespace to confirm it.
    PendingTerminal,
}

#[derive(Debug)]
pub struct SentenceBoundaryDetector {
    buffer: String,
    state: BoundaryState,
}

impl Default for SentenceBoundaryDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SentenceBoundaryDetector {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            state: BoundaryState::Accumulating,
        }
    }

    /// Feed one fragment, returning every sentence it completed in order.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        let mut completed = Vec::new();

        for ch in fragment.chars() {
            match self.state {
                BoundaryState::Accumulating => {
                    if self.buffer.is_empty() && ch.is_whitespace() {
                        continue;
                    }
                    self.buffer.push(ch);
                    if TERMINALS.contains(&ch) {
                        self.state = BoundaryState::PendingTerminal;
                    }
                }
                BoundaryState::PendingTerminal => {
                    if ch.is_whitespace() {
                        if let Some(sentence) = self.take() {
                            completed.push(sentence);
                        }
                    } else {
                        self.buffer.push(ch);
                        if !TERMINALS.contains(&ch) && !TRAILING_CLOSERS.contains(&ch) {
                            self.state = BoundaryState::Accumulating;
                        }
                    }
                }
            }
        }

        completed
    }

    /// End of stream: whatever is buffered is the last sentence.
    pub fn finish(&mut self) -> Option<String> {
        self.take()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.trim().is_empty()
    }

    fn take(&mut self) -> Option<String> {
        self.state = BoundaryState::Accumulating;
        let sentence = self.buffer.trim().to_string();
        self.buffer.clear();
        (!sentence.is_empty()).then_some(sentence)
    }
}

/// Split complete text using the same rules as the streaming detector.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut detector = SentenceBoundaryDetector::new();
    let mut sentences = detector.push(text);
    sentences.extend(detector.finish());
    sentences
}

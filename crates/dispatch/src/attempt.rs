//! Corrective retry as an explicit state machine.
//!
//! ```text
//! Pending(n, history) --reply parses-------------> Done
//! Pending(n, history) --malformed, n < max-------> Pending(n + 1, history + reply + correction)
//! Pending(max, ..)    --malformed----------------> Fatal
//! ```

use crate::backend::Message;
use context_protocol::ProtocolError;

#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    Pending { number: usize, history: Vec<Message> },
    Done(T),
    Fatal {
        error: ProtocolError,
        reply: String,
        attempts: usize,
    },
}

impl<T> Attempt<T> {
    /// First attempt with the chunk's initial conversation
    #[must_use]
    pub const fn start(history: Vec<Message>) -> Self {
        Self::Pending { number: 0, history }
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// Conversation to send for the pending attempt
    #[must_use]
    pub fn history(&self) -> Option<&[Message]> {
        match self {
            Self::Pending { history, .. } => Some(history),
            _ => None,
        }
    }

    /// Feed the reply of the pending attempt and its parse result.
    ///
    /// Terminal states are returned unchanged.
    #[must_use]
    pub fn advance(
        self,
        reply: String,
        parsed: Result<T, ProtocolError>,
        max_retries: usize,
    ) -> Self {
        let (number, mut history) = match self {
            Self::Pending { number, history } => (number, history),
            terminal => return terminal,
        };

        match parsed {
            Ok(output) => Self::Done(output),
            Err(error) if number < max_retries => {
                log::warn!(
                    "Malformed reply on attempt {} of {}: {error}",
                    number + 1,
                    max_retries + 1
                );
                history.push(Message::assistant(reply));
                history.push(Message::user(error.correction()));
                Self::Pending {
                    number: number + 1,
                    history,
                }
            }
            Err(error) => Self::Fatal {
                error,
                reply,
                attempts: number + 1,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Role;
    use pretty_assertions::assert_eq;

    fn malformed() -> Result<u32, ProtocolError> {
        Err(ProtocolError::structural("no section marker"))
    }

    #[test]
    fn success_finishes() {
        let attempt = Attempt::start(vec![Message::user("q")]).advance("ok".into(), Ok(7), 3);
        assert_eq!(attempt, Attempt::Done(7));
    }

    #[test]
    fn failure_appends_correction() {
        let attempt = Attempt::start(vec![Message::user("q")]).advance("junk".into(), malformed(), 3);
        let history = attempt.history().unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1], Message::assistant("junk"));
        assert_eq!(history[2].role, Role::User);
        assert!(history[2].content.contains("no section marker"));
    }

    #[test]
    fn exhausted_retries_are_fatal() {
        let mut attempt = Attempt::start(vec![Message::user("q")]);
        for _ in 0..3 {
            attempt = attempt.advance("junk".into(), malformed(), 2);
        }
        match attempt {
            Attempt::Fatal { attempts, reply, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(reply, "junk");
            }
            other => panic!("expected Fatal, got {other:?}"),
        }
    }

    #[test]
    fn terminal_states_are_sticky() {
        let done: Attempt<u32> = Attempt::Done(1);
        assert_eq!(done.advance("x".into(), Ok(2), 3), Attempt::Done(1));
    }
}

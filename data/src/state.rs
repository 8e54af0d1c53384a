use strum::{Display, EnumIter};

/// Lifecycle of a single server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Connecting,
    Connected,
    TransientlyDisconnected,
    #[default]
    Disconnected,
    Disconnecting,
    ReconnectWait,
    Closing,
}

impl State {
    /// Whether the edge `self -> target` exists. Never true for `self -> self`.
    pub fn can_transition_to(self, target: State) -> bool {
        use State::*;

        match self {
            Connecting => matches!(
                target,
                Connected | TransientlyDisconnected | Disconnecting | Closing
            ),
            Connected => matches!(target, Disconnecting | TransientlyDisconnected | Closing),
            TransientlyDisconnected => matches!(target, Connecting | ReconnectWait | Closing),
            Disconnected => matches!(target, Connecting | Closing),
            Disconnecting => matches!(target, Disconnected | Closing),
            ReconnectWait => matches!(
                target,
                Connecting | TransientlyDisconnected | Disconnected | Closing
            ),
            Closing => false,
        }
    }

    /// Moves to `target`, leaving `self` untouched when the edge is illegal.
    pub fn transition(&mut self, target: State) -> Result<(), Error> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(Error::IllegalTransition {
                from: *self,
                to: target,
            })
        }
    }

    pub fn is_disconnected(self) -> bool {
        matches!(self, State::Disconnected | State::TransientlyDisconnected)
    }

    pub fn is_closing(self) -> bool {
        matches!(self, State::Closing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("illegal state transition from {from} to {to}")]
    IllegalTransition { from: State, to: State },
}

#[cfg(test)]
mod test {
    use strum::IntoEnumIterator;

    use super::{Error, State};

    #[test]
    fn transition_table() {
        use State::*;

        let table = [
            (
                Connecting,
                vec![Connected, TransientlyDisconnected, Disconnecting, Closing],
            ),
            (Connected, vec![Disconnecting, TransientlyDisconnected, Closing]),
            (TransientlyDisconnected, vec![Connecting, ReconnectWait, Closing]),
            (Disconnected, vec![Connecting, Closing]),
            (Disconnecting, vec![Disconnected, Closing]),
            (
                ReconnectWait,
                vec![Connecting, TransientlyDisconnected, Disconnected, Closing],
            ),
            (Closing, vec![]),
        ];

        assert_eq!(table.len(), State::iter().count());

        for (from, allowed) in table {
            for to in State::iter() {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn irreflexive() {
        for state in State::iter() {
            assert!(!state.can_transition_to(state), "{state}");
        }
    }

    #[test]
    fn closing_is_terminal_and_reachable() {
        for state in State::iter() {
            assert!(!State::Closing.can_transition_to(state));

            if state != State::Closing {
                assert!(state.can_transition_to(State::Closing), "{state}");
            }
        }
    }

    #[test]
    fn illegal_transition_keeps_state() {
        let mut state = State::Disconnected;

        assert_eq!(
            state.transition(State::Connected),
            Err(Error::IllegalTransition {
                from: State::Disconnected,
                to: State::Connected,
            })
        );
        assert_eq!(state, State::Disconnected);

        state.transition(State::Connecting).unwrap();
        assert_eq!(state, State::Connecting);
    }

    #[test]
    fn disconnected_states() {
        let disconnected = State::iter()
            .filter(|state| state.is_disconnected())
            .collect::<Vec<_>>();

        assert_eq!(
            disconnected,
            vec![State::TransientlyDisconnected, State::Disconnected]
        );
    }
}

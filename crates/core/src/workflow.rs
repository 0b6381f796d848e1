//! Explicit workflow transition tables.
//!
//! Each document type declares its legal transitions once, as data. Every
//! command handler asks the table before deciding anything, so an illegal
//! transition is rejected before any effect is computed.

use crate::error::{DomainError, DomainResult};

/// One row of a transition table: `action` moves a document from any of
/// `from` into `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S: 'static, A: 'static> {
    pub action: A,
    pub from: &'static [S],
    pub to: S,
}

/// A document state machine.
pub trait Workflow {
    type Status: Copy + PartialEq + core::fmt::Debug + 'static;
    type Action: Copy + PartialEq + core::fmt::Debug + 'static;

    /// The complete transition table for this document type.
    const TRANSITIONS: &'static [Transition<Self::Status, Self::Action>];

    /// Resolve the target status of `action` from `current`.
    fn transition(current: Self::Status, action: Self::Action) -> DomainResult<Self::Status> {
        Self::TRANSITIONS
            .iter()
            .find(|t| t.action == action && t.from.contains(&current))
            .map(|t| t.to)
            .ok_or_else(|| {
                DomainError::invalid_transition(format!("cannot {action:?} from {current:?}"))
            })
    }

    /// Actions that are legal from `current`, in table order.
    fn allowed_actions(current: Self::Status) -> Vec<Self::Action> {
        Self::TRANSITIONS
            .iter()
            .filter(|t| t.from.contains(&current))
            .map(|t| t.action)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Light {
        Red,
        Green,
        Off,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Switch {
        Go,
        Stop,
        PowerDown,
    }

    struct Signal;

    impl Workflow for Signal {
        type Status = Light;
        type Action = Switch;

        const TRANSITIONS: &'static [Transition<Light, Switch>] = &[
            Transition {
                action: Switch::Go,
                from: &[Light::Red],
                to: Light::Green,
            },
            Transition {
                action: Switch::Stop,
                from: &[Light::Green],
                to: Light::Red,
            },
            Transition {
                action: Switch::PowerDown,
                from: &[Light::Red, Light::Green],
                to: Light::Off,
            },
        ];
    }

    #[test]
    fn legal_transition_resolves_target() {
        assert_eq!(Signal::transition(Light::Red, Switch::Go), Ok(Light::Green));
        assert_eq!(Signal::transition(Light::Green, Switch::PowerDown), Ok(Light::Off));
    }

    #[test]
    fn illegal_transition_is_rejected() {
        match Signal::transition(Light::Off, Switch::Go) {
            Err(DomainError::InvalidTransition(msg)) => assert_eq!(msg, "cannot Go from Off"),
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn allowed_actions_follow_table_order() {
        assert_eq!(
            Signal::allowed_actions(Light::Green),
            vec![Switch::Stop, Switch::PowerDown]
        );
        assert!(Signal::allowed_actions(Light::Off).is_empty());
    }
}

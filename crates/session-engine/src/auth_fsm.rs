//! Session phase state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐  NoStoredSession   ┌─────────────────┐
//! │  Initializing   │ ─────────────────► │    Anonymous    │ ◄──────────────┐
//! └────────┬────────┘                    └──┬───────────┬──┘                │
//!          │ UserFetched     LoginAttempt   │           │ RegisterAttempt   │
//!          │                                ▼           ▼                   │
//!          │                  ┌────────────────┐  ┌─────────────┐           │
//!          │                  │ Authenticating │  │ Registering │ ──────────┤
//!          │                  └───────┬────────┘  └──────┬──────┘ *Failed   │
//!          │                          │ UserFetched      │                  │
//!          ▼                          ▼                  ▼                  │
//! ┌──────────────────────────────────────────────────────────┐              │
//! │                      Authenticated                       │ ─────────────┘
//! └──────────────┬───────────────────────────────────────────┘ SessionCleared
//!                │ LoginAttempt / RegisterAttempt      ▲
//!                ▼                                     │ UserFetched / *Failed
//!       ┌──────────────────┐                           │
//!       │ Reauthenticating │ ──────────────────────────┘
//!       └──────────────────┘
//! ```
//!
//! `SessionCleared` is accepted in every phase and always lands in `Anonymous`.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Initializing)

    Initializing => {
        NoStoredSession => Anonymous,
        UserFetched => Authenticated,
        SessionCleared => Anonymous
    },
    Anonymous => {
        LoginAttempt => Authenticating,
        RegisterAttempt => Registering,
        UserFetched => Authenticated,
        SessionCleared => Anonymous
    },
    Authenticating => {
        UserFetched => Authenticated,
        LoginFailed => Anonymous,
        SessionCleared => Anonymous
    },
    Registering => {
        UserFetched => Authenticated,
        RegisterFailed => Anonymous,
        SessionCleared => Anonymous
    },
    Authenticated => {
        // A new sign-in while signed in; failure must restore the old session
        LoginAttempt => Reauthenticating,
        RegisterAttempt => Reauthenticating,
        UserFetched => Authenticated,
        SessionCleared => Anonymous
    },
    Reauthenticating => {
        UserFetched => Authenticated,
        LoginFailed => Authenticated,
        RegisterFailed => Authenticated,
        SessionCleared => Anonymous
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Session phase for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Startup check has not finished.
    Initializing,
    /// No session.
    Anonymous,
    /// Login in flight, no prior session.
    Authenticating,
    /// Registration in flight, no prior session.
    Registering,
    /// Signed in with a fetched user.
    Authenticated,
    /// Login or registration in flight on top of an existing session.
    Reauthenticating,
}

impl SessionPhase {
    /// Returns true while an operation the UI should wait on is in flight.
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            SessionPhase::Initializing
                | SessionPhase::Authenticating
                | SessionPhase::Registering
                | SessionPhase::Reauthenticating
        )
    }

    /// Returns true if a user session exists (including during reauthentication).
    pub fn has_session(&self) -> bool {
        matches!(
            self,
            SessionPhase::Authenticated | SessionPhase::Reauthenticating
        )
    }
}

impl From<&SessionMachineState> for SessionPhase {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Initializing => SessionPhase::Initializing,
            SessionMachineState::Anonymous => SessionPhase::Anonymous,
            SessionMachineState::Authenticating => SessionPhase::Authenticating,
            SessionMachineState::Registering => SessionPhase::Registering,
            SessionMachineState::Authenticated => SessionPhase::Authenticated,
            SessionMachineState::Reauthenticating => SessionPhase::Reauthenticating,
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Initializing => "initializing",
            SessionPhase::Anonymous => "anonymous",
            SessionPhase::Authenticating => "authenticating",
            SessionPhase::Registering => "registering",
            SessionPhase::Authenticated => "authenticated",
            SessionPhase::Reauthenticating => "reauthenticating",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticated() -> SessionMachine {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::UserFetched).unwrap();
        machine
    }

    #[test]
    fn test_initial_state_is_initializing() {
        let machine = SessionMachine::new();
        assert_eq!(*machine.state(), SessionMachineState::Initializing);
        assert!(SessionPhase::from(machine.state()).is_loading());
    }

    #[test]
    fn test_startup_without_session() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::NoStoredSession).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Anonymous);
    }

    #[test]
    fn test_login_flow() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::NoStoredSession).unwrap();

        machine.consume(&SessionMachineInput::LoginAttempt).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Authenticating);

        machine.consume(&SessionMachineInput::UserFetched).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);
    }

    #[test]
    fn test_login_failure_while_anonymous_stays_anonymous() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::NoStoredSession).unwrap();
        machine.consume(&SessionMachineInput::LoginAttempt).unwrap();

        machine.consume(&SessionMachineInput::LoginFailed).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Anonymous);
    }

    #[test]
    fn test_login_failure_while_authenticated_restores_session() {
        let mut machine = authenticated();

        machine.consume(&SessionMachineInput::LoginAttempt).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Reauthenticating);

        machine.consume(&SessionMachineInput::LoginFailed).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);
    }

    #[test]
    fn test_register_flow() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::NoStoredSession).unwrap();

        machine.consume(&SessionMachineInput::RegisterAttempt).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Registering);

        machine.consume(&SessionMachineInput::RegisterFailed).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Anonymous);
    }

    #[test]
    fn test_session_cleared_from_every_state() {
        let mut starts = vec![SessionMachine::new(), authenticated()];

        let mut authenticating = SessionMachine::new();
        authenticating.consume(&SessionMachineInput::NoStoredSession).unwrap();
        authenticating.consume(&SessionMachineInput::LoginAttempt).unwrap();
        starts.push(authenticating);

        let mut registering = SessionMachine::new();
        registering.consume(&SessionMachineInput::NoStoredSession).unwrap();
        registering.consume(&SessionMachineInput::RegisterAttempt).unwrap();
        starts.push(registering);

        let mut reauthenticating = authenticated();
        reauthenticating.consume(&SessionMachineInput::LoginAttempt).unwrap();
        starts.push(reauthenticating);

        for mut machine in starts {
            machine.consume(&SessionMachineInput::SessionCleared).unwrap();
            assert_eq!(*machine.state(), SessionMachineState::Anonymous);
        }
    }

    #[test]
    fn test_concurrent_login_attempt_is_rejected() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::NoStoredSession).unwrap();
        machine.consume(&SessionMachineInput::LoginAttempt).unwrap();

        assert!(machine.consume(&SessionMachineInput::LoginAttempt).is_err());
        assert!(machine.consume(&SessionMachineInput::RegisterAttempt).is_err());
    }

    #[test]
    fn test_invalid_transition_returns_error() {
        let mut machine = SessionMachine::new();

        // Cannot start a login before startup resolves
        assert!(machine.consume(&SessionMachineInput::LoginAttempt).is_err());

        machine.consume(&SessionMachineInput::NoStoredSession).unwrap();
        assert!(machine.consume(&SessionMachineInput::LoginFailed).is_err());
    }

    #[test]
    fn test_phase_conversion() {
        assert_eq!(
            SessionPhase::from(&SessionMachineState::Initializing),
            SessionPhase::Initializing
        );
        assert_eq!(
            SessionPhase::from(&SessionMachineState::Anonymous),
            SessionPhase::Anonymous
        );
        assert_eq!(
            SessionPhase::from(&SessionMachineState::Authenticating),
            SessionPhase::Authenticating
        );
        assert_eq!(
            SessionPhase::from(&SessionMachineState::Registering),
            SessionPhase::Registering
        );
        assert_eq!(
            SessionPhase::from(&SessionMachineState::Authenticated),
            SessionPhase::Authenticated
        );
        assert_eq!(
            SessionPhase::from(&SessionMachineState::Reauthenticating),
            SessionPhase::Reauthenticating
        );
    }

    #[test]
    fn test_phase_flags() {
        assert!(SessionPhase::Initializing.is_loading());
        assert!(!SessionPhase::Anonymous.is_loading());
        assert!(SessionPhase::Authenticating.is_loading());
        assert!(SessionPhase::Registering.is_loading());
        assert!(!SessionPhase::Authenticated.is_loading());
        assert!(SessionPhase::Reauthenticating.is_loading());

        assert!(SessionPhase::Authenticated.has_session());
        assert!(SessionPhase::Reauthenticating.has_session());
        assert!(!SessionPhase::Authenticating.has_session());
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionPhase::Reauthenticating).unwrap(),
            "\"reauthenticating\""
        );
    }
}

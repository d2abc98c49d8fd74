//! Session lifecycle, shared by both roles.

use tokio::time::Instant;

use crate::error::TernError;

/// The current phase of a session.
///
/// ```text
///  Created ──► Establishing ──► Established ──► Closing ──► Closed
///     │             │                │                        ▲
///     └─────────────┴────────────────┴────────────────────────┘
/// ```
///
/// A server enters `Establishing` on `do_accept`; a client on
/// `do_handshake`. Any fatal error or a forced close jumps straight to
/// `Closed`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Stream handed over, nothing issued yet.
    #[default]
    Created,

    /// Upgrade accept / handshake in flight.
    Establishing,

    /// Upgrade complete; read/write/control operations are allowed.
    Established {
        /// When the session entered `Established`.
        since: Instant,
    },

    /// A close frame has been sent and not yet acknowledged.
    Closing,

    /// Terminal. No further operations are issued.
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Establishing => write!(f, "Establishing"),
            Self::Established { .. } => write!(f, "Established"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl SessionPhase {
    /// Whether the upgrade has completed (the `accepted` / `handshaked`
    /// flag). Stays true while closing.
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established { .. } | Self::Closing)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// How long the session has been established, if it is.
    pub fn established_for(&self) -> Option<std::time::Duration> {
        match self {
            Self::Established { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Created`.
    pub fn begin_establish(&mut self) -> Result<(), TernError> {
        match self {
            Self::Created => {
                *self = Self::Establishing;
                Ok(())
            }
            _ => Err(TernError::InvalidTransition(
                "cannot establish: upgrade already issued",
            )),
        }
    }

    /// Valid from: `Establishing`.
    pub fn complete_establish(&mut self) -> Result<(), TernError> {
        match self {
            Self::Establishing => {
                *self = Self::Established {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(TernError::InvalidTransition(
                "cannot complete upgrade: not in Establishing state",
            )),
        }
    }

    /// Valid from: `Established`, `Closing` (a repeated close).
    pub fn begin_close(&mut self) -> Result<(), TernError> {
        match self {
            Self::Established { .. } | Self::Closing => {
                *self = Self::Closing;
                Ok(())
            }
            _ => Err(TernError::InvalidTransition(
                "cannot close: session is not established",
            )),
        }
    }

    /// Force to `Closed` regardless of the current phase.
    pub fn terminate(&mut self) {
        *self = Self::Closed;
    }
}

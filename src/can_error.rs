//! Errors reported by the driver

/// Errors returned from construction, mode changes and other control paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanError {
    /// Controller id outside the configured range.
    InvalidController,
    /// Hardware object handle does not resolve to a configured mailbox.
    InvalidHandle,
    /// The requested mode transition is not legal from the current state.
    InvalidTransition,
    /// Baud rate index outside the controller's baud rate table.
    InvalidBaudIndex,
    /// The operation is only legal while the controller is stopped.
    NotStopped,
    /// The static configuration is inconsistent.
    InvalidConfig,
    /// A bounded hardware wait exceeded its budget.
    Timeout,
}

impl CanError {
    pub fn get_error_message(&self) -> &'static str {
        match self {
            CanError::InvalidController => "Controller id is out of range",
            CanError::InvalidHandle => "Hardware object handle is not configured",
            CanError::InvalidTransition => "Mode transition not legal from the current state",
            CanError::InvalidBaudIndex => "Baud rate index is out of range",
            CanError::NotStopped => "Operation requires the controller to be stopped",
            CanError::InvalidConfig => "Driver configuration is inconsistent",
            CanError::Timeout => "Hardware did not acknowledge within the wait budget",
        }
    }
}

/// Result of a transmit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxError {
    /// Every candidate mailbox is occupied, another write holds the mailbox
    /// guard, or the controller is in its low-power listening state. The
    /// caller is expected to retry.
    Busy,
    /// The handle does not name a configured transmit object.
    InvalidHandle,
    /// Frame validation failed (oversize payload, or no payload source).
    InvalidFrame,
}

/// Development errors surfaced through the upper layer's diagnostic hook.
///
/// These mirror the synchronous error returns so a diagnostic layer can
/// observe caller mistakes and data-loss conditions centrally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevError {
    InvalidController,
    InvalidHandle,
    InvalidTransition,
    InvalidBaudIndex,
    InvalidFrame,
    /// A receive mailbox was overwritten before it was drained.
    RxDataLost,
    /// `enable_interrupts` was called without a matching disable.
    UnbalancedInterruptEnable,
}

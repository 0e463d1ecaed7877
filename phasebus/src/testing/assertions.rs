//! Assertion helpers for chain and invocation results.

use crate::errors::{Fault, FaultKind, WaitError};
use crate::pipeline::Chain;

/// Asserts that a result is a fault of the given kind.
///
/// # Panics
///
/// Panics if the result is `Ok` or a fault of another kind.
pub fn assert_fault_kind<T: std::fmt::Debug>(result: &Result<T, Fault>, kind: &FaultKind) {
    match result {
        Ok(value) => panic!("Expected {kind} fault, got Ok({value:?})"),
        Err(fault) => assert_eq!(&fault.kind, kind, "Unexpected fault: {fault}"),
    }
}

/// Asserts that waiting on a handle produced a fault of the given kind.
///
/// # Panics
///
/// Panics on any other outcome.
pub fn assert_wait_fault<T: std::fmt::Debug>(result: &Result<T, WaitError>, kind: &FaultKind) {
    match result {
        Err(WaitError::Fault(fault)) => {
            assert_eq!(&fault.kind, kind, "Unexpected fault: {fault}");
        }
        other => panic!("Expected {kind} fault, got {other:?}"),
    }
}

/// Asserts a chain's stage order.
///
/// # Panics
///
/// Panics if the order differs.
pub fn assert_chain_order(chain: &Chain, expected: &[&str]) {
    assert_eq!(chain.stage_ids(), expected, "Unexpected chain order");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_fault_kind() {
        let result: Result<(), Fault> = Err(Fault::new(FaultKind::Timeout, "late"));
        assert_fault_kind(&result, &FaultKind::Timeout);
    }

    #[test]
    #[should_panic(expected = "Expected timeout fault")]
    fn test_assert_fault_kind_panics_on_ok() {
        let result: Result<u8, Fault> = Ok(1);
        assert_fault_kind(&result, &FaultKind::Timeout);
    }

    #[test]
    fn test_assert_wait_fault() {
        let result: Result<(), WaitError> = Err(WaitError::Fault(Fault::cancelled("gone")));
        assert_wait_fault(&result, &FaultKind::Cancelled);
    }
}

//! What a stage returns, and how suspended stages are resumed.

use crate::errors::{Fault, FaultKind};
use tokio::sync::oneshot;

/// The result of handling a message in one stage.
#[derive(Debug)]
pub enum StageOutcome {
    /// Run the next stage.
    Continue,
    /// Stop the chain and run the fault chain.
    Fault(Fault),
    /// Park the chain until the paired [`Resumer`] is used.
    Suspend(Suspension),
}

impl StageOutcome {
    /// Returns true for `Continue`.
    #[must_use]
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }

    /// Creates a suspending outcome along with the handle that resumes it.
    #[must_use]
    pub fn suspend() -> (Self, Resumer) {
        let (suspension, resumer) = Suspension::pair();
        (Self::Suspend(suspension), resumer)
    }
}

/// How a suspended chain should proceed.
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    /// Continue with the stage after the suspended one.
    Continue,
    /// Treat the suspended stage as having faulted.
    Fault(Fault),
}

/// The waiting half of a suspension.
#[derive(Debug)]
pub struct Suspension {
    rx: oneshot::Receiver<Resume>,
}

impl Suspension {
    /// Creates a suspension and its resumer.
    #[must_use]
    pub fn pair() -> (Self, Resumer) {
        let (tx, rx) = oneshot::channel();
        (Self { rx }, Resumer { tx })
    }

    /// Waits for the resumer. A dropped resumer counts as a fault.
    pub async fn wait(self) -> Resume {
        self.rx.await.unwrap_or_else(|_| {
            Resume::Fault(Fault::new(
                FaultKind::Abandoned,
                "Suspended stage was dropped without being resumed",
            ))
        })
    }
}

/// The resuming half of a suspension; may be moved to any task.
#[derive(Debug)]
pub struct Resumer {
    tx: oneshot::Sender<Resume>,
}

impl Resumer {
    /// Resumes the chain at the next stage.
    ///
    /// Returns false if the suspended chain no longer exists.
    pub fn resume(self) -> bool {
        self.tx.send(Resume::Continue).is_ok()
    }

    /// Resumes the chain by faulting the suspended stage.
    ///
    /// Returns false if the suspended chain no longer exists.
    pub fn fail(self, fault: Fault) -> bool {
        self.tx.send(Resume::Fault(fault)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resume_continue() {
        let (suspension, resumer) = Suspension::pair();
        assert!(resumer.resume());
        assert_eq!(suspension.wait().await, Resume::Continue);
    }

    #[tokio::test]
    async fn test_resume_fault() {
        let (suspension, resumer) = Suspension::pair();
        tokio::spawn(async move {
            resumer.fail(Fault::receiver("late"));
        });
        assert!(matches!(suspension.wait().await, Resume::Fault(f) if f.message == "late"));
    }

    #[tokio::test]
    async fn test_dropped_resumer_abandons() {
        let (outcome, resumer) = StageOutcome::suspend();
        drop(resumer);
        let StageOutcome::Suspend(suspension) = outcome else {
            panic!("expected suspension");
        };
        match suspension.wait().await {
            Resume::Fault(f) => assert_eq!(f.kind, FaultKind::Abandoned),
            Resume::Continue => panic!("expected abandonment"),
        }
    }

    #[test]
    fn test_resume_after_drop_reports_false() {
        let (suspension, resumer) = Suspension::pair();
        drop(suspension);
        assert!(!resumer.resume());
    }
}

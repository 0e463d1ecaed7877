//! The mutable context a chain execution works on.

use super::{Cursor, Direction, Exchange, Key, Message, Role};
use crate::errors::Fault;

/// Read-only view of the fault a fault chain is handling.
#[derive(Debug, Clone)]
pub struct FaultView {
    origin: Direction,
    fault: Fault,
}

impl FaultView {
    /// Returns the direction of the chain that raised the fault.
    #[must_use]
    pub fn origin(&self) -> Direction {
        self.origin
    }

    /// Returns the fault.
    #[must_use]
    pub fn fault(&self) -> &Fault {
        &self.fault
    }

    /// Returns the id of the stage that raised the fault.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        self.fault.stage.as_deref()
    }

    /// Returns the phase the fault was raised in.
    #[must_use]
    pub fn phase(&self) -> Option<&str> {
        self.fault.phase.as_deref()
    }
}

/// Everything a stage can see and change while a chain runs.
///
/// Each execution owns its context exclusively; stages receive it by mutable
/// reference one at a time.
#[derive(Debug)]
pub struct MessageContext {
    direction: Direction,
    message: Message,
    exchange: Exchange,
    cursor: Cursor,
    fault: Option<FaultView>,
}

impl MessageContext {
    /// Creates a context for a message travelling in `direction`.
    #[must_use]
    pub fn new(direction: Direction, message: Message, exchange: Exchange) -> Self {
        Self {
            direction,
            message,
            exchange,
            cursor: Cursor::default(),
            fault: None,
        }
    }

    /// Turns a faulted context into one for the fault chain.
    ///
    /// The message and its properties carry over; the cursor is reset.
    #[must_use]
    pub fn for_fault(origin: Self, fault: Fault) -> Self {
        let origin_direction = match origin.fault {
            Some(ref view) => view.origin,
            None => origin.direction,
        };
        Self {
            direction: Direction::Fault,
            message: origin.message,
            exchange: origin.exchange,
            cursor: Cursor::default(),
            fault: Some(FaultView {
                origin: origin_direction,
                fault,
            }),
        }
    }

    /// Returns the flow direction.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Returns the message mutably.
    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    /// Consumes the context, returning its message.
    #[must_use]
    pub fn into_message(self) -> Message {
        self.message
    }

    /// Reads a message property.
    #[must_use]
    pub fn get<T>(&self, key: Key<T>) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.message.get(key)
    }

    /// Sets a message property.
    pub fn insert<T>(&mut self, key: Key<T>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.message.insert(key, value);
    }

    /// Returns the owning exchange.
    #[must_use]
    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    /// Returns true on the side that sent the original request.
    #[must_use]
    pub fn is_requestor(&self) -> bool {
        self.exchange.role() == Role::Client
    }

    /// Returns the cursor.
    #[must_use]
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Returns the cursor mutably, for inserting stages or halting the chain.
    pub fn cursor_mut(&mut self) -> &mut Cursor {
        &mut self.cursor
    }

    pub(crate) fn set_cursor(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }

    /// Returns the fault being handled, when running a fault chain.
    #[must_use]
    pub fn fault(&self) -> Option<&FaultView> {
        self.fault.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::keys;

    #[test]
    fn test_for_fault_keeps_message() {
        let ex = Exchange::client(false);
        let mut ctx = MessageContext::new(Direction::Outbound, Message::new("body"), ex.clone());
        ctx.insert(keys::OPERATION, "echo".to_string());

        let fault = Fault::receiver("boom").raised_at("s1", "marshal");
        let fctx = MessageContext::for_fault(ctx, fault);

        assert_eq!(fctx.direction(), Direction::Fault);
        assert_eq!(fctx.message().text(), "body");
        assert_eq!(fctx.get(keys::OPERATION).map(String::as_str), Some("echo"));
        let view = fctx.fault().unwrap();
        assert_eq!(view.origin(), Direction::Outbound);
        assert_eq!(view.stage(), Some("s1"));
        assert_eq!(view.phase(), Some("marshal"));
        assert_eq!(fctx.exchange().id(), ex.id());
    }

    #[test]
    fn test_is_requestor_follows_role() {
        let client = MessageContext::new(Direction::Inbound, Message::empty(), Exchange::client(false));
        let server = MessageContext::new(Direction::Inbound, Message::empty(), Exchange::server());
        assert!(client.is_requestor());
        assert!(!server.is_requestor());
    }
}

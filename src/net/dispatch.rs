//! Message-ID routing for the datagram reactor.

use std::collections::HashMap;

use tracing::debug;

use super::message::DatagramMessage;

/// Handles one datagram. Returning `true` asks the reactor to echo the
/// (possibly rewritten) payload back to the sender.
pub trait MessageHandler: Send {
    fn execute(&mut self, message: &mut DatagramMessage) -> bool;
}

/// Pre-dispatch gate. Returning `false` drops the datagram before any
/// handler sees it.
pub trait MessageFilter: Send {
    fn execute(&mut self, message: &mut DatagramMessage) -> bool;
}

impl<F> MessageHandler for F
where
    F: FnMut(&mut DatagramMessage) -> bool + Send,
{
    fn execute(&mut self, message: &mut DatagramMessage) -> bool {
        self(message)
    }
}

/// Routes datagrams to handlers by their leading big-endian u16 ID.
///
/// Itself a [`MessageHandler`], so a dispatcher can sit anywhere a single
/// handler can. Datagrams with an unregistered ID, or too short to carry
/// an ID, are dropped with a debug log and no response.
#[derive(Default)]
pub struct MessageDispatcher {
    handlers: HashMap<u16, Box<dyn MessageHandler>>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `id`, returning any handler it replaced.
    pub fn register(
        &mut self,
        id: u16,
        handler: Box<dyn MessageHandler>,
    ) -> Option<Box<dyn MessageHandler>> {
        self.handlers.insert(id, handler)
    }

    /// Replaces the whole routing table at once.
    pub fn set_handlers(
        &mut self,
        handlers: impl IntoIterator<Item = (u16, Box<dyn MessageHandler>)>,
    ) {
        self.handlers = handlers.into_iter().collect();
    }

    pub fn contains(&self, id: u16) -> bool {
        self.handlers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl MessageHandler for MessageDispatcher {
    fn execute(&mut self, message: &mut DatagramMessage) -> bool {
        let Some(id) = message.message_id() else {
            debug!(len = message.payload().len(), "datagram too short for a message id; dropping");
            return false;
        };
        match self.handlers.get_mut(&id) {
            Some(handler) => handler.execute(message),
            None => {
                debug!(id, "no handler for message id; dropping");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn message_with_id(id: u16) -> DatagramMessage {
        let mut msg = DatagramMessage::new(32, 0);
        msg.put_message_id(id);
        msg.fill(2, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9));
        msg
    }

    #[test]
    fn routes_to_the_registered_handler() {
        let mut dispatcher = MessageDispatcher::new();
        dispatcher.register(7, Box::new(|_msg: &mut DatagramMessage| true));
        dispatcher.register(8, Box::new(|_msg: &mut DatagramMessage| false));

        let mut msg = message_with_id(7);
        assert!(dispatcher.execute(&mut msg));
        let mut msg = message_with_id(8);
        assert!(!dispatcher.execute(&mut msg));
    }

    #[test]
    fn unknown_id_is_dropped_without_response() {
        let mut dispatcher = MessageDispatcher::new();
        let mut msg = message_with_id(42);
        assert!(!dispatcher.execute(&mut msg));
    }

    #[test]
    fn short_datagram_is_dropped() {
        let mut dispatcher = MessageDispatcher::new();
        dispatcher.register(0, Box::new(|_msg: &mut DatagramMessage| true));
        let mut msg = DatagramMessage::new(32, 0);
        msg.fill(1, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9));
        assert!(!dispatcher.execute(&mut msg));
    }

    #[test]
    fn set_handlers_replaces_the_whole_table() {
        let mut dispatcher = MessageDispatcher::new();
        dispatcher.register(1, Box::new(|_: &mut DatagramMessage| true));
        dispatcher.set_handlers(vec![
            (2, Box::new(|_: &mut DatagramMessage| true) as Box<dyn MessageHandler>),
            (3, Box::new(|_: &mut DatagramMessage| false) as Box<dyn MessageHandler>),
        ]);
        assert!(!dispatcher.contains(1));
        assert!(dispatcher.contains(2));
        assert_eq!(dispatcher.len(), 2);

        let mut msg = message_with_id(1);
        assert!(!dispatcher.execute(&mut msg));
        let mut msg = message_with_id(2);
        assert!(dispatcher.execute(&mut msg));
    }

    #[test]
    fn register_replaces_and_reports_the_old_handler() {
        let mut dispatcher = MessageDispatcher::new();
        assert!(dispatcher.register(1, Box::new(|_: &mut DatagramMessage| false)).is_none());
        assert!(dispatcher.register(1, Box::new(|_: &mut DatagramMessage| true)).is_some());
        assert_eq!(dispatcher.len(), 1);

        let mut msg = message_with_id(1);
        assert!(dispatcher.execute(&mut msg));
    }
}

//! Conversation facade
//!
//! [`Chat`] binds one room to one conversation. It subscribes to the chat,
//! update and history topics through the shared [`TopicRegistry`], folds
//! everything that arrives into a [`Conversation`] on a single reducer task,
//! and publishes the sorted list through a watch channel.
//!
//! Outgoing messages are published reliably and, once the room accepted them,
//! fed back into the same pipeline as a local echo. The network copy of the
//! same message (if a transport ever delivers one) is then a no-op.

use std::sync::{Arc, Mutex, PoisonError};

use murmur_core::{
    ChatMessage, ChatOptions, CommandRequest, Conversation, Participant, ReceivedChatMessage,
};
use murmur_net::{
    DataPacket, Inbound, PeerInfo, PublishOptions, Room, SubscriptionHandle, TopicRegistry,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Transport peer as a chat participant
pub fn participant(peer: PeerInfo) -> Participant {
    Participant {
        identity: peer.identity,
        name: peer.name,
    }
}

/// Counts sends in flight and mirrors "any in flight" into a watch channel
struct InFlight {
    count: Mutex<usize>,
    flag: watch::Sender<bool>,
}

impl InFlight {
    fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            count: Mutex::new(0),
            flag,
        }
    }

    fn begin(&self) -> InFlightGuard<'_> {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count += 1;
        if *count == 1 {
            self.flag.send_replace(true);
        }
        InFlightGuard(self)
    }

    fn end(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.flag.send_replace(false);
        }
    }
}

/// Lowers the in-flight flag on every exit path, cancellation included
struct InFlightGuard<'a>(&'a InFlight);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}

/// One room's conversation
pub struct Chat {
    room: Arc<dyn Room>,
    options: ChatOptions,
    subscription: SubscriptionHandle,
    messages: watch::Receiver<Vec<ReceivedChatMessage>>,
    in_flight: InFlight,
    reducer: JoinHandle<()>,
}

impl Chat {
    /// Subscribe to `room` and start folding its chat traffic
    ///
    /// Must be called from within a tokio runtime.
    pub fn setup(room: Arc<dyn Room>, registry: &TopicRegistry, options: ChatOptions) -> Result<Self> {
        let subscription = registry.subscribe(
            &room,
            options.topics.subscribed(),
            options.channel_capacity,
        )?;
        let (subscription, inbound) = subscription.split();

        let (messages_tx, messages) = watch::channel(Vec::new());
        let reducer = tokio::spawn(reducer_task(inbound, options.clone(), messages_tx));

        info!(room_id = %room.id(), "Chat ready");

        Ok(Self {
            room,
            options,
            subscription,
            messages,
            in_flight: InFlight::new(),
            reducer,
        })
    }

    /// Send a new message on the chat topic
    pub async fn send(&self, text: impl Into<String>) -> Result<ChatMessage> {
        let message = self.compose(ChatMessage::with_fresh_id(text));
        let topic = self.options.topics.chat.clone();
        self.publish_message(message, &topic).await
    }

    /// Replace the body of an existing message
    pub async fn update(
        &self,
        text: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Result<ChatMessage> {
        let message = self.compose(ChatMessage::new(message_id, text));
        let topic = self.options.topics.update.clone();
        self.publish_message(message, &topic).await
    }

    /// Broadcast a full snapshot that replaces every receiver's conversation
    ///
    /// Failures are logged, not returned.
    pub async fn update_history(&self, messages: &[ChatMessage]) {
        let topic = &self.options.topics.history;
        let payload = match self.options.codec.encode_history(messages) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Could not encode history");
                return;
            }
        };

        match self
            .room
            .publish(payload.clone(), PublishOptions::reliable(topic.as_str()))
            .await
        {
            Ok(()) => {
                debug!(count = messages.len(), "Published history");
                self.echo(topic, payload);
            }
            Err(e) => warn!(topic = %topic, error = %e, "History publish failed"),
        }
    }

    /// Ask the agent to act on a message
    pub async fn send_command(&self, request: &CommandRequest) -> Result<()> {
        let payload = request.to_bytes()?;
        self.room
            .publish(
                payload,
                PublishOptions::reliable(self.options.topics.command.as_str()),
            )
            .await?;
        info!(command = %request.command, arg = ?request.arg, "Sent command");
        Ok(())
    }

    /// Publish an arbitrary payload reliably, e.g. an agent push
    pub async fn publish_raw(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.room
            .publish(payload, PublishOptions::reliable(topic))
            .await?;
        Ok(())
    }

    /// Current messages in display order
    pub fn messages(&self) -> Vec<ReceivedChatMessage> {
        self.messages.borrow().clone()
    }

    pub fn subscribe_messages(&self) -> watch::Receiver<Vec<ReceivedChatMessage>> {
        self.messages.clone()
    }

    /// Whether a send or update is awaiting completion
    pub fn is_sending(&self) -> bool {
        *self.in_flight.flag.borrow()
    }

    pub fn subscribe_sending(&self) -> watch::Receiver<bool> {
        self.in_flight.flag.subscribe()
    }

    pub fn room(&self) -> &Arc<dyn Room> {
        &self.room
    }

    pub fn options(&self) -> &ChatOptions {
        &self.options
    }

    /// Identity stamped on outgoing messages
    pub fn local_identity(&self) -> String {
        let configured = &self.options.defaults.participant;
        if configured.is_empty() {
            self.room.local_participant().identity
        } else {
            configured.clone()
        }
    }

    /// Release this facade's subscription; other facades on the room keep
    /// theirs
    pub fn close(self) {}

    fn compose(&self, mut message: ChatMessage) -> ChatMessage {
        let defaults = &self.options.defaults;
        message.participant = self.local_identity();
        message.conversation_id = defaults.conversation_id.clone();
        message.character_id = defaults.character_id.clone();
        message.model = defaults.model.clone();
        message.kind = defaults.kind.clone();
        message
    }

    async fn publish_message(&self, message: ChatMessage, topic: &str) -> Result<ChatMessage> {
        let _in_flight = self.in_flight.begin();

        let payload = self.options.codec.encode(&message)?;
        self.room
            .publish(payload.clone(), PublishOptions::reliable(topic))
            .await?;
        debug!(message_id = %message.id, topic = %topic, "Published message");

        self.echo(topic, payload);
        Ok(message)
    }

    fn echo(&self, topic: &str, payload: Vec<u8>) {
        let packet = DataPacket::new(payload, topic, Some(self.room.local_participant()));
        if !self.subscription.inject(packet) {
            debug!(topic = %topic, "Subscription gone; local echo dropped");
        }
    }
}

impl Drop for Chat {
    fn drop(&mut self) {
        self.reducer.abort();
        debug!(room_id = %self.room.id(), "Chat closed");
    }
}

/// Single consumer folding the subscription into the conversation
async fn reducer_task(
    mut inbound: Inbound,
    options: ChatOptions,
    messages: watch::Sender<Vec<ReceivedChatMessage>>,
) {
    let mut conversation = Conversation::new();

    while let Some(packet) = inbound.recv().await {
        let DataPacket {
            payload,
            topic,
            from,
        } = packet;
        let Some(topic) = topic else {
            debug!("Ignoring packet without a topic");
            continue;
        };

        let changed = conversation.ingest(
            &topic,
            &payload,
            from.map(participant),
            options.codec.as_ref(),
            &options.topics,
        );
        if changed {
            messages.send_replace(conversation.messages().to_vec());
        }
    }

    debug!(count = conversation.len(), "Chat stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use murmur_core::{CommandKind, JsonCodec, MessageCodec};
    use murmur_net::{MemoryHub, MemoryRoom, RoomEvent, RoomId, Subscription};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast;
    use tokio::time::timeout;

    fn setup_pair(hub: &MemoryHub) -> (Arc<MemoryRoom>, Arc<dyn Room>, Arc<dyn Room>) {
        let user = Arc::new(hub.join(PeerInfo::new("user").with_name("Ana")));
        let user_room: Arc<dyn Room> = user.clone();
        let agent: Arc<dyn Room> = Arc::new(hub.join(PeerInfo::new("agent")));
        (user, user_room, agent)
    }

    async fn wait_for_messages<F>(
        rx: &mut watch::Receiver<Vec<ReceivedChatMessage>>,
        pred: F,
    ) -> Vec<ReceivedChatMessage>
    where
        F: FnMut(&Vec<ReceivedChatMessage>) -> bool,
    {
        timeout(Duration::from_secs(2), rx.wait_for(pred))
            .await
            .expect("timed out waiting for messages")
            .unwrap()
            .clone()
    }

    async fn next_packet(sub: &mut Subscription) -> DataPacket {
        timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("timed out waiting for packet")
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_roundtrip() {
        let hub = MemoryHub::new();
        let (_user, user_room, agent) = setup_pair(&hub);
        let registry = TopicRegistry::new();
        let options = ChatOptions::default();
        let mut wire = registry
            .subscribe(&agent, [options.topics.chat.clone()], 16)
            .unwrap();

        let chat = Chat::setup(user_room, &registry, options).unwrap();
        let sent = chat.send("hello").await.unwrap();

        assert_eq!(sent.alt_ids, vec![sent.id.clone()]);
        assert!(!sent.is_assistant);
        assert!(!sent.deleted);
        assert!(sent.parent_id.is_empty());
        assert_eq!(sent.participant, "user");
        assert_eq!(sent.kind, "message");

        let packet = next_packet(&mut wire).await;
        let decoded = JsonCodec.decode(&packet.payload).unwrap();
        assert_eq!(decoded.id, sent.id);
        assert_eq!(decoded.message.message, "hello");
        assert_eq!(packet.from.unwrap().identity, "user");

        // Local echo lands in our own conversation, attributed to us
        let mut rx = chat.subscribe_messages();
        let messages = wait_for_messages(&mut rx, |m| m.len() == 1).await;
        assert_eq!(messages[0].id, sent.id);
        let from = messages[0].from.as_ref().unwrap();
        assert_eq!(from.identity, "user");
        assert_eq!(from.name.as_deref(), Some("Ana"));
        assert!(!chat.is_sending());
    }

    /// JSON written back to front, counting decodes
    #[derive(Default)]
    struct ReversedCodec {
        decoded: AtomicUsize,
    }

    fn reversed(mut bytes: Vec<u8>) -> Vec<u8> {
        bytes.reverse();
        bytes
    }

    impl MessageCodec for ReversedCodec {
        fn encode(&self, message: &ChatMessage) -> murmur_core::Result<Vec<u8>> {
            JsonCodec.encode(message).map(reversed)
        }

        fn encode_history(&self, messages: &[ChatMessage]) -> murmur_core::Result<Vec<u8>> {
            JsonCodec.encode_history(messages).map(reversed)
        }

        fn decode(&self, payload: &[u8]) -> murmur_core::Result<ReceivedChatMessage> {
            self.decoded.fetch_add(1, Ordering::SeqCst);
            JsonCodec.decode(&reversed(payload.to_vec()))
        }

        fn decode_history(&self, payload: &[u8]) -> murmur_core::Result<Vec<ChatMessage>> {
            JsonCodec.decode_history(&reversed(payload.to_vec()))
        }
    }

    #[tokio::test]
    async fn test_custom_codec_drives_wire_and_echo() {
        let hub = MemoryHub::new();
        let (_user, user_room, agent) = setup_pair(&hub);
        let registry = TopicRegistry::new();
        let codec = Arc::new(ReversedCodec::default());
        let options = ChatOptions::default().with_codec(codec.clone());
        let mut wire = registry
            .subscribe(&agent, [options.topics.chat.clone()], 16)
            .unwrap();

        let chat = Chat::setup(user_room, &registry, options).unwrap();
        let mut rx = chat.subscribe_messages();
        let sent = chat.send("backwards").await.unwrap();

        // Peers see the custom encoding, not JSON
        let packet = next_packet(&mut wire).await;
        assert!(JsonCodec.decode(&packet.payload).is_err());
        assert_eq!(codec.decode(&packet.payload).unwrap().id, sent.id);

        let messages = wait_for_messages(&mut rx, |m| m.len() == 1).await;
        assert_eq!(messages[0].id, sent.id);
        assert_eq!(messages[0].message.message, "backwards");
        assert!(codec.decoded.load(Ordering::SeqCst) >= 2);
    }

    /// Room whose publishes are refused, recording the in-flight flag seen
    /// while each publish is running
    struct RefusingRoom {
        id: RoomId,
        events: broadcast::Sender<RoomEvent>,
        probe: Mutex<Option<watch::Receiver<bool>>>,
        seen: Mutex<Vec<bool>>,
    }

    impl RefusingRoom {
        fn new() -> Self {
            let (events, _) = broadcast::channel(8);
            Self {
                id: RoomId::new(),
                events,
                probe: Mutex::new(None),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Room for RefusingRoom {
        fn id(&self) -> RoomId {
            self.id
        }

        fn local_participant(&self) -> PeerInfo {
            PeerInfo::new("user")
        }

        async fn publish(&self, _payload: Vec<u8>, _options: PublishOptions) -> murmur_net::Result<()> {
            if let Some(probe) = self.probe.lock().unwrap().as_ref() {
                self.seen.lock().unwrap().push(*probe.borrow());
            }
            Err(murmur_net::Error::Rejected("publish refused".into()))
        }

        fn events(&self) -> broadcast::Receiver<RoomEvent> {
            self.events.subscribe()
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_in_flight_flag_on_failure() {
        let room = Arc::new(RefusingRoom::new());
        let dyn_room: Arc<dyn Room> = room.clone();
        let registry = TopicRegistry::new();
        let chat = Chat::setup(dyn_room, &registry, ChatOptions::default()).unwrap();

        assert!(!chat.is_sending());
        *room.probe.lock().unwrap() = Some(chat.subscribe_sending());

        let result = chat.send("hello").await;
        assert!(matches!(
            result,
            Err(Error::Net(murmur_net::Error::Rejected(_)))
        ));
        assert_eq!(*room.seen.lock().unwrap(), vec![true]);
        assert!(!chat.is_sending());

        let result = chat.update("again", "m1").await;
        assert!(result.is_err());
        assert!(!chat.is_sending());

        // A failed send leaves no trace in the conversation
        assert!(chat.messages().is_empty());
    }

    #[tokio::test]
    async fn test_remote_edit_reconciled() {
        let hub = MemoryHub::new();
        let (_user, user_room, agent) = setup_pair(&hub);
        let registry = TopicRegistry::new();
        let chat = Chat::setup(user_room, &registry, ChatOptions::default()).unwrap();
        let topics = chat.options().topics.clone();
        let mut rx = chat.subscribe_messages();

        let mut original = ChatMessage::new("m1", "draft").at(100);
        original.is_assistant = true;
        agent
            .publish(
                JsonCodec.encode(&original).unwrap(),
                PublishOptions::reliable(topics.chat.as_str()),
            )
            .await
            .unwrap();
        wait_for_messages(&mut rx, |m| m.len() == 1).await;

        let edit = ChatMessage::new("m1", "final").at(200);
        agent
            .publish(
                JsonCodec.encode(&edit).unwrap(),
                PublishOptions::reliable(topics.update.as_str()),
            )
            .await
            .unwrap();

        let messages = wait_for_messages(&mut rx, |m| {
            m.first().is_some_and(|m| m.message.message == "final")
        })
        .await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].timestamp, 100);
        assert_eq!(messages[0].edit_timestamp, Some(200));
        assert_eq!(messages[0].sender_identity(), Some("agent"));
    }

    #[tokio::test]
    async fn test_malformed_payload_does_not_stop_stream() {
        let hub = MemoryHub::new();
        let (_user, user_room, agent) = setup_pair(&hub);
        let registry = TopicRegistry::new();
        let chat = Chat::setup(user_room, &registry, ChatOptions::default()).unwrap();
        let chat_topic = chat.options().topics.chat.clone();
        let mut rx = chat.subscribe_messages();

        agent
            .publish(b"not json".to_vec(), PublishOptions::reliable(chat_topic.as_str()))
            .await
            .unwrap();
        agent
            .publish(
                JsonCodec.encode(&ChatMessage::new("ok", "fine")).unwrap(),
                PublishOptions::reliable(chat_topic.as_str()),
            )
            .await
            .unwrap();

        let messages = wait_for_messages(&mut rx, |m| !m.is_empty()).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "ok");
    }

    #[tokio::test]
    async fn test_update_history_replaces_conversation() {
        let hub = MemoryHub::new();
        let (_user, user_room, _agent) = setup_pair(&hub);
        let registry = TopicRegistry::new();
        let chat = Chat::setup(user_room, &registry, ChatOptions::default()).unwrap();
        let mut rx = chat.subscribe_messages();

        chat.send("one").await.unwrap();
        wait_for_messages(&mut rx, |m| m.len() == 1).await;

        let snapshot = vec![
            ChatMessage::new("b", "second").at(20),
            ChatMessage::new("a", "first").at(10),
        ];
        chat.update_history(&snapshot).await;

        let messages = wait_for_messages(&mut rx, |m| m.len() == 2).await;
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_send_command_envelope() {
        let hub = MemoryHub::new();
        let (_user, user_room, agent) = setup_pair(&hub);
        let registry = TopicRegistry::new();
        let options = ChatOptions::default();
        let mut wire = registry
            .subscribe(&agent, [options.topics.command.clone()], 16)
            .unwrap();
        let chat = Chat::setup(user_room, &registry, options).unwrap();

        let request = CommandRequest::new(CommandKind::Rgen, Some("m1".into()));
        chat.send_command(&request).await.unwrap();

        let packet = next_packet(&mut wire).await;
        assert_eq!(CommandRequest::from_bytes(&packet.payload).unwrap(), request);
    }

    #[tokio::test]
    async fn test_close_is_scoped_to_facade() {
        let hub = MemoryHub::new();
        let (_user, user_room, agent) = setup_pair(&hub);
        let registry = TopicRegistry::new();

        let first = Chat::setup(user_room.clone(), &registry, ChatOptions::default()).unwrap();
        let second = Chat::setup(user_room.clone(), &registry, ChatOptions::default()).unwrap();
        assert_eq!(registry.subscriber_count(user_room.id()), 2);

        first.close();
        assert_eq!(registry.subscriber_count(user_room.id()), 1);

        let topic = second.options().topics.chat.clone();
        agent
            .publish(
                JsonCodec.encode(&ChatMessage::new("x", "still listening")).unwrap(),
                PublishOptions::reliable(topic.as_str()),
            )
            .await
            .unwrap();

        let mut rx = second.subscribe_messages();
        wait_for_messages(&mut rx, |m| m.len() == 1).await;
    }

    #[tokio::test]
    async fn test_disconnect_tears_down() {
        let hub = MemoryHub::new();
        let (user, user_room, _agent) = setup_pair(&hub);
        let registry = TopicRegistry::new();
        let chat = Chat::setup(user_room.clone(), &registry, ChatOptions::default()).unwrap();

        user.disconnect();

        timeout(Duration::from_secs(2), async {
            while registry.subscriber_count(user_room.id()) > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("subscription was not torn down");

        assert!(matches!(
            chat.send("late").await,
            Err(Error::Net(murmur_net::Error::NotConnected))
        ));
        assert!(!chat.is_sending());
    }
}

//! Inbound message dispatch: dedup, log, and route to one reply branch.
//!
//! Branch priority for a text message (normalized: trimmed, lowercased):
//! 1. auto-reply whose keyword appears in the text (first in storage order)
//! 2. menu trigger → stored menu document (the listing when none is set)
//! 3. order-list trigger → rendered menu listing
//! 4. order prefix → place an order for the named item
//! 5. default response
//!
//! Failures are logged and swallowed; nothing propagates back to the link.

use super::dedup::ProcessedIds;
use super::outbound::OutboundGateway;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use wasla_core::{
    config::DispatchConfig,
    error::WaslaError,
    message::{InboundMessage, OutboundPayload},
};
use wasla_memory::{
    store::{format_price, DEFAULT_RESPONSE_KEY, MENU_DOCUMENT_KEY},
    CartItem, Store,
};

/// Which branch handled a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Duplicate,
    /// Our own message, or not text.
    Ignored,
    AutoReply,
    MenuDocument,
    MenuListing,
    OrderPlaced,
    /// Order prefix with an unknown item; nothing is sent.
    OrderNotFound,
    Default,
    /// A storage or send error was logged and dropped.
    Failed,
}

pub struct Dispatcher {
    store: Store,
    outbound: OutboundGateway,
    config: DispatchConfig,
    processed: Mutex<ProcessedIds>,
}

impl Dispatcher {
    pub fn new(store: Store, outbound: OutboundGateway, config: DispatchConfig) -> Self {
        let processed = Mutex::new(ProcessedIds::new(config.dedup_capacity));
        Self {
            store,
            outbound,
            config,
            processed,
        }
    }

    /// Consume inbound messages until the link side hangs up.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<InboundMessage>) {
        info!("dispatcher running");
        while let Some(msg) = rx.recv().await {
            self.on_inbound_message(msg).await;
        }
        info!("dispatcher stopped: inbound channel closed");
    }

    pub async fn on_inbound_message(&self, msg: InboundMessage) -> Route {
        let fresh = self
            .processed
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .check_and_insert(&msg.id);
        if !fresh {
            debug!("duplicate message {} dropped", msg.id);
            return Route::Duplicate;
        }
        if msg.from_me {
            return Route::Ignored;
        }

        if let Err(e) = self.store.log_message(&msg).await {
            error!("failed to log message {}: {e}", msg.id);
        }

        let Some(text) = msg.content.text() else {
            debug!("{} message {} not routed", msg.content.kind(), msg.id);
            return Route::Ignored;
        };

        let normalized = text.trim().to_lowercase();
        match self.route(&msg.chat_id, &normalized).await {
            Ok(route) => {
                debug!("message {} from {} → {route:?}", msg.id, msg.sender);
                route
            }
            Err(e) => {
                error!("dispatch failed for {} in {}: {e}", msg.id, msg.chat_id);
                Route::Failed
            }
        }
    }

    async fn route(&self, chat_id: &str, text: &str) -> Result<Route, WaslaError> {
        // Auto-replies.
        let replies = self.store.list_auto_replies().await?;
        if let Some(reply) = replies.iter().find(|r| {
            let keyword = r.keyword.trim().to_lowercase();
            !keyword.is_empty() && text.contains(&keyword)
        }) {
            self.reply(chat_id, &reply.response).await?;
            return Ok(Route::AutoReply);
        }

        // Menu document, or the listing when no document is set.
        if text == normalize(&self.config.menu_trigger) {
            if let Some(path) = self.store.get_setting(MENU_DOCUMENT_KEY).await? {
                self.outbound.send(chat_id, &menu_document(&path)).await?;
                return Ok(Route::MenuDocument);
            }
            debug!("menu requested but no menu document is set, sending listing");
            return self.send_listing(chat_id).await;
        }

        // Menu listing.
        if text == normalize(&self.config.order_list_trigger) {
            return self.send_listing(chat_id).await;
        }

        // Order placement.
        if let Some(rest) = text.strip_prefix(&normalize_prefix(&self.config.order_prefix)) {
            let name = rest.trim();
            let Some(item) = self.store.find_menu_item(name).await? else {
                debug!("order for unknown item '{name}' ignored");
                return Ok(Route::OrderNotFound);
            };
            let cart = [CartItem {
                name: item.name.clone(),
                quantity: 1,
                price: Some(item.price),
            }];
            let order_id = self.store.create_order(chat_id, &cart).await?;
            info!("order {order_id} placed by {chat_id}: {}", item.name);
            let confirmation = self.config.order_confirmation.replace("{item}", &item.name);
            self.reply(chat_id, &confirmation).await?;
            return Ok(Route::OrderPlaced);
        }

        // Default.
        let response = self
            .store
            .get_setting(DEFAULT_RESPONSE_KEY)
            .await?
            .unwrap_or_else(|| self.config.fallback_response.clone());
        self.reply(chat_id, &response).await?;
        Ok(Route::Default)
    }

    /// Header plus one "{name} - {price} {currency}" line per item, chunked.
    async fn send_listing(&self, chat_id: &str) -> Result<Route, WaslaError> {
        let items = self.store.list_menu_items().await?;
        let mut lines = Vec::with_capacity(items.len() + 1);
        lines.push(self.config.listing_header.clone());
        lines.extend(items.iter().map(|item| {
            format!(
                "{} - {} {}",
                item.name,
                format_price(item.price),
                self.config.currency
            )
        }));
        self.outbound.send_lines(chat_id, &lines).await?;
        Ok(Route::MenuListing)
    }

    async fn reply(&self, chat_id: &str, text: &str) -> Result<(), WaslaError> {
        self.outbound
            .send(chat_id, &OutboundPayload::text(text))
            .await
            .map(|_| ())
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Prefixes keep their trailing space so "اطلب برجر" matches but "اطلبني" does not.
fn normalize_prefix(s: &str) -> String {
    s.trim_start().to_lowercase()
}

/// Document payload for the stored menu file.
fn menu_document(path: &str) -> OutboundPayload {
    let file_name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());
    OutboundPayload::Document {
        path: path.to_string(),
        file_name,
        caption: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::{FixedLink, RecordingLink};
    use chrono::Utc;
    use wasla_core::{
        config::OutboundConfig,
        message::{InboundContent, InboundMessage},
        traits::Link,
    };

    const CHAT: &str = "966500000000@s.whatsapp.net";

    async fn dispatcher_with(link: Arc<RecordingLink>) -> (Dispatcher, Store) {
        let store = Store::open_in_memory().await.unwrap();
        let outbound = OutboundGateway::new(
            Arc::new(FixedLink::new(Some(link as Arc<dyn Link>))),
            store.clone(),
            OutboundConfig::default(),
        );
        let dispatcher = Dispatcher::new(store.clone(), outbound, DispatchConfig::default());
        (dispatcher, store)
    }

    fn text(id: &str, body: &str) -> InboundMessage {
        InboundMessage {
            id: id.to_string(),
            chat_id: CHAT.to_string(),
            sender: "966500000000".to_string(),
            sender_name: Some("Sara".to_string()),
            from_me: false,
            content: InboundContent::Text {
                text: body.to_string(),
            },
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_auto_reply_substring_case_insensitive() {
        let link = RecordingLink::new();
        let (d, store) = dispatcher_with(link.clone()).await;
        store.upsert_auto_reply("hi", "hello").await.unwrap();

        let route = d.on_inbound_message(text("m1", "  HI there ")).await;

        assert_eq!(route, Route::AutoReply);
        assert_eq!(link.texts(), vec!["hello"]);
        assert_eq!(link.sent()[0].0, CHAT);
    }

    #[tokio::test]
    async fn test_first_auto_reply_in_storage_order_wins() {
        let link = RecordingLink::new();
        let (d, store) = dispatcher_with(link.clone()).await;
        store.upsert_auto_reply("price", "first").await.unwrap();
        store.upsert_auto_reply("menu price", "second").await.unwrap();

        d.on_inbound_message(text("m1", "menu price please")).await;

        assert_eq!(link.texts(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_not_processed_twice() {
        let link = RecordingLink::new();
        let (d, store) = dispatcher_with(link.clone()).await;

        assert_eq!(d.on_inbound_message(text("dup", "hello")).await, Route::Default);
        assert_eq!(d.on_inbound_message(text("dup", "hello")).await, Route::Duplicate);

        assert_eq!(link.sent().len(), 1);
        assert_eq!(store.messages_for_chat(CHAT).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_id_seen_again_after_dedup_set_resets() {
        let link = RecordingLink::new();
        let (d, store) = dispatcher_with(link.clone()).await;

        for i in 0..=1000 {
            let route = d.on_inbound_message(text(&i.to_string(), "hello")).await;
            assert_eq!(route, Route::Default);
        }
        let route = d.on_inbound_message(text("0", "hello")).await;

        assert_eq!(route, Route::Default);
        let logged = store.messages_for_chat(CHAT).await.unwrap();
        assert_eq!(logged.iter().filter(|m| m.message_id == "0").count(), 2);
        assert_eq!(link.sent().len(), 1002);
    }

    #[tokio::test]
    async fn test_menu_listing_in_stored_order() {
        let link = RecordingLink::new();
        let (d, store) = dispatcher_with(link.clone()).await;
        store.add_menu_item("Burger", 10.0, None).await.unwrap();
        store.add_menu_item("Fries", 5.0, None).await.unwrap();

        let route = d.on_inbound_message(text("m1", "قائمة الطعام")).await;

        assert_eq!(route, Route::MenuListing);
        assert_eq!(
            link.texts(),
            vec!["قائمة الطعام:\nBurger - 10 ريال\nFries - 5 ريال\n"]
        );
    }

    #[tokio::test]
    async fn test_long_menu_listing_is_chunked() {
        let link = RecordingLink::new();
        let (d, store) = dispatcher_with(link.clone()).await;
        for i in 0..300 {
            store
                .add_menu_item(&format!("Dish number {i} with a long name"), 12.5, None)
                .await
                .unwrap();
        }

        d.on_inbound_message(text("m1", "قائمة الطعام")).await;

        let texts = link.texts();
        assert!(texts.len() > 1);
        assert!(texts.iter().all(|t| t.chars().count() <= 4000));
        assert!(texts[0].starts_with("قائمة الطعام:"));

        let mut expected = String::from("قائمة الطعام:\n");
        for i in 0..300 {
            expected.push_str(&format!("Dish number {i} with a long name - 12.5 ريال\n"));
        }
        assert_eq!(texts.concat(), expected);
    }

    #[tokio::test]
    async fn test_menu_trigger_sends_document() {
        let link = RecordingLink::new();
        let (d, store) = dispatcher_with(link.clone()).await;
        store
            .set_setting(MENU_DOCUMENT_KEY, "/srv/files/menu.pdf")
            .await
            .unwrap();

        let route = d.on_inbound_message(text("m1", "المنيو")).await;

        assert_eq!(route, Route::MenuDocument);
        assert_eq!(
            link.sent()[0].1,
            OutboundPayload::Document {
                path: "/srv/files/menu.pdf".into(),
                file_name: Some("menu.pdf".into()),
                caption: None,
            }
        );
    }

    #[tokio::test]
    async fn test_menu_trigger_without_document_sends_listing() {
        let link = RecordingLink::new();
        let (d, store) = dispatcher_with(link.clone()).await;
        store.add_menu_item("Burger", 10.0, None).await.unwrap();

        let route = d.on_inbound_message(text("m1", "المنيو")).await;

        assert_eq!(route, Route::MenuListing);
        assert_eq!(link.texts(), vec!["قائمة الطعام:\nBurger - 10 ريال\n"]);
    }

    #[tokio::test]
    async fn test_order_placed_for_known_item() {
        let link = RecordingLink::new();
        let (d, store) = dispatcher_with(link.clone()).await;
        store.add_menu_item("Burger", 10.0, None).await.unwrap();

        let route = d.on_inbound_message(text("m1", "اطلب burger")).await;

        assert_eq!(route, Route::OrderPlaced);
        let orders = store.list_orders().await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].chat_id, CHAT);
        assert_eq!(orders[0].items[0].name, "Burger");
        assert_eq!(orders[0].status, "pending");
        assert!(link.texts()[0].contains("Burger"));
    }

    #[tokio::test]
    async fn test_order_for_unknown_item_is_silent() {
        let link = RecordingLink::new();
        let (d, store) = dispatcher_with(link.clone()).await;

        let route = d.on_inbound_message(text("m1", "اطلب pizza")).await;

        assert_eq!(route, Route::OrderNotFound);
        assert!(link.sent().is_empty());
        assert!(store.list_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_uses_stored_response() {
        let link = RecordingLink::new();
        let (d, store) = dispatcher_with(link.clone()).await;
        store
            .set_setting(DEFAULT_RESPONSE_KEY, "أهلاً بك")
            .await
            .unwrap();

        let route = d.on_inbound_message(text("m1", "something else")).await;

        assert_eq!(route, Route::Default);
        assert_eq!(link.texts(), vec!["أهلاً بك"]);
    }

    #[tokio::test]
    async fn test_own_and_non_text_messages_not_routed() {
        let link = RecordingLink::new();
        let (d, _) = dispatcher_with(link.clone()).await;

        let mut own = text("m1", "hi");
        own.from_me = true;
        assert_eq!(d.on_inbound_message(own).await, Route::Ignored);

        let mut doc = text("m2", "");
        doc.content = InboundContent::Document {
            file_name: Some("a.pdf".into()),
            mimetype: None,
        };
        assert_eq!(d.on_inbound_message(doc).await, Route::Ignored);

        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_is_swallowed() {
        let link = RecordingLink::failing();
        let (d, store) = dispatcher_with(link).await;

        let route = d.on_inbound_message(text("m1", "hello")).await;

        assert_eq!(route, Route::Failed);
        // The message was still logged before the failed reply.
        assert_eq!(store.messages_for_chat(CHAT).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let link = RecordingLink::new();
        let (d, _) = dispatcher_with(link.clone()).await;
        let (tx, rx) = mpsc::channel(4);
        tx.send(text("m1", "a")).await.unwrap();
        tx.send(text("m2", "b")).await.unwrap();
        drop(tx);

        Arc::new(d).run(rx).await;

        assert_eq!(link.sent().len(), 2);
    }
}

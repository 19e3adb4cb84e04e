//! Routers compose `{filter → handler}` pairs into a tree; each plugin
//! contributes one named sub-router, attached in dependency order.

use std::sync::Arc;

use async_trait::async_trait;

use mb_domain::Result;
use mb_telegram::Update;

use crate::context::{extract_command, RequestContext};

/// A single update handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, update: &Update, ctx: &mut RequestContext) -> Result<()>;
}

/// Predicate selecting which updates a route accepts.
#[derive(Debug, Clone)]
pub enum UpdateFilter {
    /// `/name` (with or without `@mention`).
    Command(String),
    /// Any command message.
    AnyCommand,
    /// Non-command message.
    Text,
    /// Any message, command or not.
    Message,
    /// Callback query whose data starts with the prefix.
    CallbackPrefix(String),
    /// Any callback query.
    AnyCallback,
    /// Everything.
    Any,
}

impl UpdateFilter {
    pub fn command(name: &str) -> Self {
        UpdateFilter::Command(name.to_string())
    }

    pub fn callback_prefix(prefix: &str) -> Self {
        UpdateFilter::CallbackPrefix(prefix.to_string())
    }

    pub fn matches(&self, update: &Update) -> bool {
        let command = update
            .any_message()
            .and_then(|m| m.content())
            .and_then(extract_command);
        match self {
            UpdateFilter::Command(name) => command.as_deref() == Some(name.as_str()),
            UpdateFilter::AnyCommand => command.is_some(),
            UpdateFilter::Text => update.any_message().is_some() && command.is_none(),
            UpdateFilter::Message => update.any_message().is_some(),
            UpdateFilter::CallbackPrefix(prefix) => update
                .callback_query
                .as_ref()
                .and_then(|cb| cb.data.as_deref())
                .is_some_and(|data| data.starts_with(prefix)),
            UpdateFilter::AnyCallback => update.callback_query.is_some(),
            UpdateFilter::Any => true,
        }
    }
}

struct Route {
    filter: UpdateFilter,
    handler: Arc<dyn Handler>,
}

/// A named node of the handler graph.
pub struct Router {
    name: String,
    routes: Vec<Route>,
    children: Vec<Router>,
}

impl Router {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            routes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a route on this router.
    pub fn route(&mut self, filter: UpdateFilter, handler: Arc<dyn Handler>) {
        self.routes.push(Route { filter, handler });
    }

    /// Attach a sub-router. Attach order is match order.
    pub fn include(&mut self, child: Router) {
        self.children.push(child);
    }

    /// First matching handler: own routes first, then children
    /// depth-first in attach order.
    pub fn find(&self, update: &Update) -> Option<Arc<dyn Handler>> {
        for route in &self.routes {
            if route.filter.matches(update) {
                return Some(Arc::clone(&route.handler));
            }
        }
        self.children.iter().find_map(|child| child.find(update))
    }

    /// Names of directly attached sub-routers.
    pub fn child_names(&self) -> Vec<&str> {
        self.children.iter().map(|c| c.name.as_str()).collect()
    }

    /// Whether the tree contains a router with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.name == name || self.children.iter().any(|c| c.contains(name))
    }

    pub fn route_count(&self) -> usize {
        self.routes.len() + self.children.iter().map(|c| c.route_count()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag(&'static str, Arc<parking_lot::Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl Handler for Tag {
        async fn handle(&self, _update: &Update, _ctx: &mut RequestContext) -> Result<()> {
            self.1.lock().push(self.0);
            Ok(())
        }
    }

    fn message_update(text: &str) -> Update {
        serde_json::from_value(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "from": {"id": 5, "first_name": "T"},
                "chat": {"id": 5, "type": "private"},
                "text": text
            }
        }))
        .unwrap()
    }

    fn callback_update(data: &str) -> Update {
        serde_json::from_value(serde_json::json!({
            "update_id": 2,
            "callback_query": {
                "id": "c", "from": {"id": 9, "first_name": "X"}, "data": data
            }
        }))
        .unwrap()
    }

    #[test]
    fn filters_match_expected_updates() {
        let start = message_update("/start");
        let plain = message_update("hi");
        let callback = callback_update("buy:small");

        assert!(UpdateFilter::command("start").matches(&start));
        assert!(!UpdateFilter::command("help").matches(&start));
        assert!(UpdateFilter::AnyCommand.matches(&start));
        assert!(!UpdateFilter::AnyCommand.matches(&plain));
        assert!(UpdateFilter::Text.matches(&plain));
        assert!(!UpdateFilter::Text.matches(&start));
        assert!(UpdateFilter::Message.matches(&start));
        assert!(UpdateFilter::Message.matches(&plain));
        assert!(!UpdateFilter::Message.matches(&callback));
        assert!(UpdateFilter::callback_prefix("buy:").matches(&callback));
        assert!(!UpdateFilter::callback_prefix("sub:").matches(&callback));
        assert!(UpdateFilter::AnyCallback.matches(&callback));
        assert!(UpdateFilter::Any.matches(&callback));
    }

    #[tokio::test]
    async fn first_match_wins_own_routes_before_children() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut root = Router::new("root");
        root.route(
            UpdateFilter::command("start"),
            Arc::new(Tag("root-start", log.clone())),
        );

        let mut child = Router::new("child");
        child.route(
            UpdateFilter::command("start"),
            Arc::new(Tag("child-start", log.clone())),
        );
        child.route(
            UpdateFilter::AnyCommand,
            Arc::new(Tag("child-any", log.clone())),
        );
        root.include(child);

        let client = Arc::new(mb_telegram::TelegramClient::new("1:t"));

        let update = message_update("/start");
        let mut ctx = RequestContext::new("b", client.clone(), None, &update);
        root.find(&update).unwrap().handle(&update, &mut ctx).await.unwrap();

        let update = message_update("/other");
        let mut ctx = RequestContext::new("b", client, None, &update);
        root.find(&update).unwrap().handle(&update, &mut ctx).await.unwrap();

        assert_eq!(*log.lock(), vec!["root-start", "child-any"]);
    }

    #[test]
    fn contains_walks_the_tree() {
        let mut root = Router::new("main_demo");
        let mut start = Router::new("start");
        start.include(Router::new("nested"));
        root.include(start);
        root.include(Router::new("help"));

        assert!(root.contains("help"));
        assert!(root.contains("nested"));
        assert!(!root.contains("billing"));
        assert_eq!(root.child_names(), vec!["start", "help"]);
    }

    #[test]
    fn no_match_returns_none() {
        let root = Router::new("empty");
        assert!(root.find(&message_update("/start")).is_none());
        assert_eq!(root.route_count(), 0);
    }
}

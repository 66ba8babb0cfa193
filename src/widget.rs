//! Widget renderer.
//!
//! A page asks for its widgets by publishing a [`PageEvent`] on the `widget`
//! topic. Rendered widgets are sent back on the fire-once topic
//! `once.widget.<request id>`, so they wait in the bus backlog until the
//! page's websocket connects.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::bus::{once_topic, EventBus, WIDGET_TOPIC};

/// Namespace of the one-shot topics carrying rendered widgets
pub const WIDGET_NAMESPACE: &str = "widget";

/// Widgets rendered for every page layout
const WIDGETS: [&str; 3] = ["top", "navy", "menu"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEvent {
    #[serde(rename = "RequestID")]
    pub request_id: String,
    #[serde(rename = "Layout")]
    pub layout: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub data: String,
}

impl WidgetEvent {
    fn rendered(name: &str) -> Self {
        Self {
            kind: "widget".to_string(),
            id: name.to_string(),
            data: format!("<h2>rendered {name}</h2>"),
        }
    }
}

/// Serve render requests from the `widget` topic until the bus closes.
pub async fn run_widget_renderer(bus: EventBus) {
    let mut stream = match bus.subscribe(WIDGET_TOPIC).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "Failed to subscribe");
            return;
        }
    };

    debug!("Subscribed on widget");
    while let Some(message) = stream.recv().await {
        let page: PageEvent = match message.decode() {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "Malformed page event");
                continue;
            }
        };
        debug!(request_id = %page.request_id, layout = %page.layout, "Render widgets");

        for name in WIDGETS {
            publish_widget(&bus, &page.request_id, name);
        }
    }
    debug!("Subscription closed");
}

fn publish_widget(bus: &EventBus, request_id: &str, name: &str) {
    let topic = once_topic(WIDGET_NAMESPACE, request_id);
    if let Err(e) = bus.publish(&topic, &WidgetEvent::rendered(name)) {
        error!(name, error = %e, "Widget event publish error");
    }
}

use tokio::sync::mpsc;

/// Hands the user over to the in-match lobby flow.
pub trait LobbyNavigator: Send + Sync + 'static {
    fn enter(&self, match_id: &str);
}

/// Forwards navigation requests to whoever drives the UI.
#[derive(Clone)]
pub struct ChannelNavigator {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelNavigator {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LobbyNavigator for ChannelNavigator {
    fn enter(&self, match_id: &str) {
        if self.tx.send(match_id.to_string()).is_err() {
            tracing::debug!(match_id, "navigation dropped: no UI listening");
        }
    }
}

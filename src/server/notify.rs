use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;

use super::protocol::ServerMessage;
use super::session::SessionRegistry;
use crate::farm::LandPlot;
use crate::logutil::escape_log;

/// Pushes `crop_update` events to everyone watching a farm.
#[derive(Clone)]
pub struct Notifier {
    registry: Arc<SessionRegistry>,
}

impl Notifier {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Tell the owner (if present and at home) and all spectators that `account_id`'s
    /// land changed. Returns how many sessions accepted the update.
    pub fn farm_changed(&self, account_id: &str, land: &[LandPlot], now: DateTime<Utc>) -> usize {
        let observers = self.registry.observers_of(account_id);
        if observers.is_empty() {
            return 0;
        }
        let owner_line = crop_update(land, now, None);
        let visitor_line = crop_update(land, now, Some(account_id));
        let mut delivered = 0;
        for observer in observers {
            let line = if observer.is_visiting {
                visitor_line.clone()
            } else {
                owner_line.clone()
            };
            if self.registry.send_to(observer.session_id, line) {
                delivered += 1;
            } else {
                // connection is mid-teardown
                debug!(
                    target: "sproutfarm::session",
                    "dropped crop_update for {} to session {}",
                    escape_log(account_id),
                    observer.session_id
                );
            }
        }
        delivered
    }
}

fn crop_update(land: &[LandPlot], now: DateTime<Utc>, visited: Option<&str>) -> String {
    ServerMessage::CropUpdate {
        farm_lots: land.to_vec(),
        timestamp: now,
        is_visiting: visited.is_some(),
        visited_player: visited.map(str::to_string),
    }
    .to_line()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::session::Outbound;
    use serde_json::Value;
    use tokio::sync::mpsc;

    fn line(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Value {
        match rx.try_recv().unwrap() {
            Outbound::Line(l) => serde_json::from_str(&l).unwrap(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn owner_and_spectator_get_distinct_flags() {
        let registry = Arc::new(SessionRegistry::new());
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = registry.register("127.0.0.1:1".parse().unwrap(), tx_a);
        let b = registry.register("127.0.0.1:2".parse().unwrap(), tx_b);
        registry.authenticate(a, "u1").unwrap();
        registry.authenticate(b, "u2").unwrap();
        registry.set_spectating(b, Some("u1".into())).unwrap();

        let notifier = Notifier::new(registry);
        let land = vec![LandPlot::dug_empty()];
        assert_eq!(notifier.farm_changed("u1", &land, Utc::now()), 2);

        let owner = line(&mut rx_a);
        assert_eq!(owner["type"], "crop_update");
        assert_eq!(owner["is_visiting"], false);
        let visitor = line(&mut rx_b);
        assert_eq!(visitor["is_visiting"], true);
        assert_eq!(visitor["visited_player"], "u1");
        assert_eq!(visitor["farm_lots"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn nobody_watching_is_a_no_op() {
        let notifier = Notifier::new(Arc::new(SessionRegistry::new()));
        assert_eq!(notifier.farm_changed("ghost", &[], Utc::now()), 0);
    }
}
